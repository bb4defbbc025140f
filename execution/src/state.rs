use stakebook_types::{
    Amount, Identity, OwnerId, Wager, WagerId, WagerKind, WagerStatus, Wallet, WalletSnapshot,
};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, MutexGuard},
};
use thiserror::Error;

/// Why a batch was refused. Nothing in the batch was applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Precondition {
    Version {
        owner: OwnerId,
        expected: u64,
        actual: u64,
    },
    Status {
        wager: WagerId,
        expected: WagerStatus,
        actual: Option<WagerStatus>,
    },
    Funds {
        owner: OwnerId,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("precondition failed: {0:?}")]
    Conflict(Precondition),
    #[error("unknown wallet {0}")]
    UnknownWallet(OwnerId),
    #[error("balance overflow for {0}")]
    Overflow(OwnerId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    ExpectVersion { owner: OwnerId, version: u64 },
    ExpectStatus { wager: WagerId, status: WagerStatus },
    Credit { owner: OwnerId, amount: Amount },
    Debit { owner: OwnerId, amount: Amount },
    PutWager(Wager),
}

/// Ordered set of operations committed atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(mut self, owner: &OwnerId, version: u64) -> Self {
        self.ops.push(Op::ExpectVersion {
            owner: owner.clone(),
            version,
        });
        self
    }

    pub fn expect_status(mut self, wager: WagerId, status: WagerStatus) -> Self {
        self.ops.push(Op::ExpectStatus { wager, status });
        self
    }

    pub fn credit(mut self, owner: &OwnerId, amount: Amount) -> Self {
        if !amount.is_zero() {
            self.ops.push(Op::Credit {
                owner: owner.clone(),
                amount,
            });
        }
        self
    }

    pub fn debit(mut self, owner: &OwnerId, amount: Amount) -> Self {
        if !amount.is_zero() {
            self.ops.push(Op::Debit {
                owner: owner.clone(),
                amount,
            });
        }
        self
    }

    pub fn put_wager(mut self, wager: Wager) -> Self {
        self.ops.push(Op::PutWager(wager));
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Document store holding wallets and wagers.
///
/// Implementations must apply a [Batch] atomically: either every precondition
/// holds and every operation is applied, or nothing changes. Every applied batch
/// bumps the version of each wallet it touches.
pub trait Store: Send + Sync {
    /// Create the wallet if absent, otherwise refresh its profile flag.
    fn ensure_wallet(
        &self,
        identity: &Identity,
        initial: Amount,
    ) -> impl Future<Output = Result<Wallet, StoreError>> + Send;

    /// Consistent read of a wallet and all of its wagers.
    fn snapshot(
        &self,
        owner: &OwnerId,
    ) -> impl Future<Output = Result<Option<WalletSnapshot>, StoreError>> + Send;

    fn wager(&self, id: &WagerId) -> impl Future<Output = Result<Option<Wager>, StoreError>> + Send;

    /// Pending event wagers (of every owner) whose event starts at or before the cutoff.
    fn pending_event_wagers(
        &self,
        starts_at_or_before_ms: u64,
    ) -> impl Future<Output = Result<Vec<Wager>, StoreError>> + Send;

    /// Atomic balance increment. Returns the new balance.
    fn increment(
        &self,
        owner: &OwnerId,
        amount: Amount,
    ) -> impl Future<Output = Result<Amount, StoreError>> + Send;

    fn commit(&self, batch: Batch) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Default)]
struct Documents {
    wallets: HashMap<OwnerId, Wallet>,
    wagers: HashMap<WagerId, Wager>,
    by_owner: HashMap<OwnerId, Vec<WagerId>>,
}

/// In-process [Store].
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<Documents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Documents> {
        // A panic mid-commit cannot leave a half-applied batch, so the data is still
        // consistent after poisoning.
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(documents: &mut Documents, batch: Batch) -> Result<(), StoreError> {
        // Check every precondition and compute the resulting balances first.
        let mut balances: HashMap<OwnerId, Amount> = HashMap::new();
        for op in batch.ops() {
            match op {
                Op::ExpectVersion { owner, version } => {
                    let wallet = documents
                        .wallets
                        .get(owner)
                        .ok_or_else(|| StoreError::UnknownWallet(owner.clone()))?;
                    if wallet.version != *version {
                        return Err(StoreError::Conflict(Precondition::Version {
                            owner: owner.clone(),
                            expected: *version,
                            actual: wallet.version,
                        }));
                    }
                }
                Op::ExpectStatus { wager, status } => {
                    let actual = documents.wagers.get(wager).map(|wager| wager.status);
                    if actual != Some(*status) {
                        return Err(StoreError::Conflict(Precondition::Status {
                            wager: *wager,
                            expected: *status,
                            actual,
                        }));
                    }
                }
                Op::Credit { owner, amount } => {
                    let balance = Self::staged_balance(documents, &balances, owner)?;
                    let next = balance
                        .checked_add(*amount)
                        .ok_or_else(|| StoreError::Overflow(owner.clone()))?;
                    balances.insert(owner.clone(), next);
                }
                Op::Debit { owner, amount } => {
                    let balance = Self::staged_balance(documents, &balances, owner)?;
                    let next = balance.checked_sub(*amount).ok_or_else(|| {
                        StoreError::Conflict(Precondition::Funds {
                            owner: owner.clone(),
                        })
                    })?;
                    balances.insert(owner.clone(), next);
                }
                Op::PutWager(wager) => {
                    if !documents.wallets.contains_key(&wager.owner) {
                        return Err(StoreError::UnknownWallet(wager.owner.clone()));
                    }
                }
            }
        }

        // Apply.
        let mut touched: Vec<OwnerId> = balances.keys().cloned().collect();
        for (owner, balance) in balances {
            if let Some(wallet) = documents.wallets.get_mut(&owner) {
                wallet.balance = balance;
            }
        }
        for op in batch.ops {
            if let Op::PutWager(wager) = op {
                if !touched.contains(&wager.owner) {
                    touched.push(wager.owner.clone());
                }
                if !documents.wagers.contains_key(&wager.id) {
                    documents
                        .by_owner
                        .entry(wager.owner.clone())
                        .or_default()
                        .push(wager.id);
                }
                documents.wagers.insert(wager.id, wager);
            }
        }
        for owner in touched {
            if let Some(wallet) = documents.wallets.get_mut(&owner) {
                wallet.version += 1;
            }
        }
        Ok(())
    }

    fn staged_balance(
        documents: &Documents,
        balances: &HashMap<OwnerId, Amount>,
        owner: &OwnerId,
    ) -> Result<Amount, StoreError> {
        if let Some(balance) = balances.get(owner) {
            return Ok(*balance);
        }
        documents
            .wallets
            .get(owner)
            .map(|wallet| wallet.balance)
            .ok_or_else(|| StoreError::UnknownWallet(owner.clone()))
    }
}

impl Store for MemoryStore {
    async fn ensure_wallet(&self, identity: &Identity, initial: Amount) -> Result<Wallet, StoreError> {
        let mut documents = self.lock();
        let wallet = documents
            .wallets
            .entry(identity.owner.clone())
            .or_insert_with(|| {
                let mut wallet = Wallet::new(identity.owner.clone(), identity.profile_complete);
                wallet.balance = initial;
                wallet
            });
        if wallet.profile_complete != identity.profile_complete {
            wallet.profile_complete = identity.profile_complete;
            wallet.version += 1;
        }
        Ok(wallet.clone())
    }

    async fn snapshot(&self, owner: &OwnerId) -> Result<Option<WalletSnapshot>, StoreError> {
        let documents = self.lock();
        let Some(wallet) = documents.wallets.get(owner) else {
            return Ok(None);
        };
        let wagers = documents
            .by_owner
            .get(owner)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| documents.wagers.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(WalletSnapshot {
            wallet: wallet.clone(),
            wagers,
        }))
    }

    async fn wager(&self, id: &WagerId) -> Result<Option<Wager>, StoreError> {
        Ok(self.lock().wagers.get(id).cloned())
    }

    async fn pending_event_wagers(&self, starts_at_or_before_ms: u64) -> Result<Vec<Wager>, StoreError> {
        let documents = self.lock();
        let mut due: Vec<Wager> = documents
            .wagers
            .values()
            .filter(|wager| wager.is_pending())
            .filter(|wager| match &wager.kind {
                WagerKind::Event(event) => event.event_start_ms <= starts_at_or_before_ms,
                WagerKind::Round(_) => false,
            })
            .cloned()
            .collect();
        due.sort_by_key(|wager| (wager.created_at_ms, wager.id));
        Ok(due)
    }

    async fn increment(&self, owner: &OwnerId, amount: Amount) -> Result<Amount, StoreError> {
        let mut documents = self.lock();
        let wallet = documents
            .wallets
            .get_mut(owner)
            .ok_or_else(|| StoreError::UnknownWallet(owner.clone()))?;
        wallet.balance = wallet
            .balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Overflow(owner.clone()))?;
        wallet.version += 1;
        Ok(wallet.balance)
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        let mut documents = self.lock();
        Self::apply(&mut documents, batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakebook_types::{RoundId, RoundWager};

    fn alice() -> OwnerId {
        OwnerId::from("alice")
    }

    fn round_wager(id: u128, stake: Amount) -> Wager {
        Wager {
            id: WagerId::from_u128(id),
            owner: alice(),
            stake,
            created_at_ms: id as u64,
            status: WagerStatus::Pending,
            kind: WagerKind::Round(RoundWager {
                round_id: RoundId(id as u64),
                auto_cash_out: None,
                settled_multiplier: None,
            }),
        }
    }

    async fn funded(balance: Amount) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .ensure_wallet(&Identity::new("alice", true), balance)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_wallet_is_idempotent() {
        let store = funded(Amount::units(10)).await;
        let wallet = store
            .ensure_wallet(&Identity::new("alice", true), Amount::units(99))
            .await
            .unwrap();
        assert_eq!(wallet.balance, Amount::units(10));
        assert_eq!(wallet.version, 0);

        let wallet = store
            .ensure_wallet(&Identity::new("alice", false), Amount::ZERO)
            .await
            .unwrap();
        assert!(!wallet.profile_complete);
        assert_eq!(wallet.version, 1);
    }

    #[tokio::test]
    async fn commit_applies_everything_and_bumps_version() {
        let store = funded(Amount::units(50)).await;
        let wager = round_wager(1, Amount::units(20));
        store
            .commit(
                Batch::new()
                    .expect_version(&alice(), 0)
                    .debit(&alice(), wager.stake)
                    .put_wager(wager.clone()),
            )
            .await
            .unwrap();

        let snapshot = store.snapshot(&alice()).await.unwrap().unwrap();
        assert_eq!(snapshot.balance(), Amount::units(30));
        assert_eq!(snapshot.wallet.version, 1);
        assert_eq!(snapshot.wagers, vec![wager]);
    }

    #[tokio::test]
    async fn failed_precondition_changes_nothing() {
        let store = funded(Amount::units(50)).await;
        let err = store
            .commit(
                Batch::new()
                    .debit(&alice(), Amount::units(20))
                    .put_wager(round_wager(1, Amount::units(20)))
                    .expect_version(&alice(), 7),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict(Precondition::Version { expected: 7, actual: 0, .. })
        ));
        let snapshot = store.snapshot(&alice()).await.unwrap().unwrap();
        assert_eq!(snapshot.balance(), Amount::units(50));
        assert!(snapshot.wagers.is_empty());
    }

    #[tokio::test]
    async fn overdraw_is_a_conflict() {
        let store = funded(Amount::units(5)).await;
        let err = store
            .commit(Batch::new().debit(&alice(), Amount::units(6)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict(Precondition::Funds { owner: alice() })
        );
        assert_eq!(
            store.snapshot(&alice()).await.unwrap().unwrap().balance(),
            Amount::units(5)
        );
    }

    #[tokio::test]
    async fn status_guard_detects_concurrent_resolution() {
        let store = funded(Amount::units(50)).await;
        let wager = round_wager(1, Amount::units(10));
        store.commit(Batch::new().put_wager(wager.clone())).await.unwrap();

        let mut won = wager.clone();
        won.transition(WagerStatus::CashedOut).unwrap();
        store
            .commit(
                Batch::new()
                    .expect_status(wager.id, WagerStatus::Pending)
                    .put_wager(won),
            )
            .await
            .unwrap();

        let mut lost = wager.clone();
        lost.transition(WagerStatus::Lost).unwrap();
        let err = store
            .commit(
                Batch::new()
                    .expect_status(wager.id, WagerStatus::Pending)
                    .put_wager(lost),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict(Precondition::Status {
                wager: wager.id,
                expected: WagerStatus::Pending,
                actual: Some(WagerStatus::CashedOut),
            })
        );
    }

    #[tokio::test]
    async fn increment_requires_wallet() {
        let store = MemoryStore::new();
        assert_eq!(
            store.increment(&alice(), Amount::units(1)).await,
            Err(StoreError::UnknownWallet(alice()))
        );
        let store = funded(Amount::ZERO).await;
        assert_eq!(
            store.increment(&alice(), Amount::units(3)).await,
            Ok(Amount::units(3))
        );
    }
}
