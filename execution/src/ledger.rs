//! Wallet ledger.
//!
//! The ledger is the only writer of balances and wager statuses. Every mutation is
//! a single store [Batch] carrying the preconditions it was decided under:
//!
//! - Placements expect the wallet version of the snapshot they were validated
//!   against. A concurrent change fails the commit and the placement is
//!   re-validated against a fresh snapshot.
//! - Resolutions expect the wager to still be `Pending`. Whoever commits first
//!   wins; the loser observes the terminal status and fails with
//!   [StateError::InvalidStateTransition].
//!
//! Conflicts are retried up to [LedgerConfig::max_commit_attempts] times before
//! surfacing as [InfrastructureError::Contention].

use crate::{
    state::{Batch, Store, StoreError},
    validator::{self, Proposal, WagerLimits},
    withdrawal::WithdrawalPolicy,
};
use stakebook_types::{
    Amount, EventOutcome, EventWager, EventWagerIntent, Identity, InfrastructureError,
    LedgerError, OwnerId, RoundId, RoundWager, RoundWagerIntent, StateError, ValidationError,
    Wager, WagerId, WagerKind, WagerStatus, Wallet, WalletSnapshot, WalletView,
};
use tracing::{debug, info, warn};

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownWallet(owner) => StateError::UnknownWallet(owner).into(),
            StoreError::Overflow(_) => InfrastructureError::Overflow.into(),
            StoreError::Unavailable(reason) => InfrastructureError::Unavailable(reason).into(),
            // Conflicts are normally consumed by the retry loops.
            StoreError::Conflict(precondition) => {
                InfrastructureError::Unavailable(format!("unresolved conflict: {precondition:?}"))
                    .into()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LedgerConfig {
    pub limits: WagerLimits,
    pub withdrawal: WithdrawalPolicy,
    pub max_commit_attempts: usize,
    /// Balance credited when a wallet is first opened.
    pub starting_balance: Amount,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            limits: WagerLimits::default(),
            withdrawal: WithdrawalPolicy::default(),
            max_commit_attempts: 4,
            starting_balance: Amount::ZERO,
        }
    }
}

pub struct Ledger<S: Store> {
    store: S,
    config: LedgerConfig,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Open the wallet on first sight of an identity and keep its profile flag current.
    pub async fn open_wallet(&self, identity: &Identity) -> Result<Wallet, LedgerError> {
        let wallet = self
            .store
            .ensure_wallet(identity, self.config.starting_balance)
            .await?;
        debug!(owner = %wallet.owner, version = wallet.version, "wallet opened");
        Ok(wallet)
    }

    pub async fn add_funds(&self, owner: &OwnerId, amount: f64) -> Result<Amount, LedgerError> {
        let cents = Amount::from_decimal(amount)
            .filter(|cents| !cents.is_zero())
            .ok_or(ValidationError::InvalidAmount(amount))?;
        let balance = self.store.increment(owner, cents).await?;
        info!(%owner, amount = %cents, %balance, "funds added");
        Ok(balance)
    }

    pub async fn place_event_wager(
        &self,
        owner: &OwnerId,
        intent: &EventWagerIntent,
        now_ms: u64,
    ) -> Result<Wager, LedgerError> {
        let id = WagerId::random();
        let wager = self
            .place(owner, Proposal::Event(intent), |stake| {
                let potential_payout = stake
                    .scale(intent.price_multiplier)
                    .ok_or(ValidationError::InvalidPriceMultiplier(intent.price_multiplier))?;
                Ok(Wager {
                    id,
                    owner: owner.clone(),
                    stake,
                    created_at_ms: now_ms,
                    status: WagerStatus::Pending,
                    kind: WagerKind::Event(EventWager {
                        event_id: intent.event_id.clone(),
                        event_description: intent.event_description.clone(),
                        event_start_ms: intent.event_start_ms,
                        selected_outcome: intent.selected_outcome.clone(),
                        price_multiplier: intent.price_multiplier,
                        potential_payout,
                    }),
                })
            })
            .await?;
        info!(
            %owner,
            wager = %wager.id,
            event = %intent.event_id,
            stake = %wager.stake,
            "event wager placed"
        );
        Ok(wager)
    }

    /// Debit the stake and record a pending round wager. The round itself is run by
    /// the caller.
    pub async fn place_round_wager(
        &self,
        owner: &OwnerId,
        intent: &RoundWagerIntent,
        round_id: RoundId,
        now_ms: u64,
    ) -> Result<Wager, LedgerError> {
        let id = WagerId::random();
        let wager = self
            .place(owner, Proposal::Round(intent), |stake| {
                Ok(Wager {
                    id,
                    owner: owner.clone(),
                    stake,
                    created_at_ms: now_ms,
                    status: WagerStatus::Pending,
                    kind: WagerKind::Round(RoundWager {
                        round_id,
                        auto_cash_out: intent.auto_cash_out,
                        settled_multiplier: None,
                    }),
                })
            })
            .await?;
        info!(%owner, wager = %wager.id, round = %round_id, stake = %wager.stake, "round wager placed");
        Ok(wager)
    }

    /// Credit `stake × final_multiplier` and mark the round wager cashed out.
    pub async fn settle_round_wager(
        &self,
        wager_id: WagerId,
        final_multiplier: f64,
    ) -> Result<Wager, LedgerError> {
        let wager = self
            .resolve(wager_id, WagerStatus::CashedOut, |wager| {
                let WagerKind::Round(round) = &mut wager.kind else {
                    return Err(StateError::WrongWagerKind(wager.id).into());
                };
                round.settled_multiplier = Some(final_multiplier);
                let payout = wager
                    .stake
                    .scale(final_multiplier)
                    .ok_or(InfrastructureError::Overflow)?;
                Ok(payout)
            })
            .await?;
        info!(owner = %wager.owner, wager = %wager.id, multiplier = final_multiplier, "round wager cashed out");
        Ok(wager)
    }

    /// Mark a crashed round's wager lost. The stake was already debited at placement.
    pub async fn forfeit_round_wager(
        &self,
        wager_id: WagerId,
        crash_point: f64,
    ) -> Result<Wager, LedgerError> {
        let wager = self
            .resolve(wager_id, WagerStatus::Lost, |wager| {
                let WagerKind::Round(round) = &mut wager.kind else {
                    return Err(StateError::WrongWagerKind(wager.id).into());
                };
                round.settled_multiplier = Some(crash_point);
                Ok(Amount::ZERO)
            })
            .await?;
        info!(owner = %wager.owner, wager = %wager.id, crash_point, "round wager forfeited");
        Ok(wager)
    }

    /// Refund a pending event wager while the withdrawal window is open.
    pub async fn withdraw_event_wager(
        &self,
        owner: &OwnerId,
        wager_id: WagerId,
        now_ms: u64,
    ) -> Result<Wager, LedgerError> {
        let policy = self.config.withdrawal;
        let wager = self
            .resolve(wager_id, WagerStatus::Withdrawn, |wager| {
                if &wager.owner != owner {
                    return Err(StateError::UnknownWager(wager.id).into());
                }
                let Some(event) = wager.event() else {
                    return Err(StateError::WrongWagerKind(wager.id).into());
                };
                if !wager.is_pending() {
                    return Err(StateError::InvalidStateTransition {
                        wager: wager.id,
                        from: wager.status,
                    }
                    .into());
                }
                policy.check(event.event_start_ms, now_ms)?;
                Ok(wager.stake)
            })
            .await?;
        info!(%owner, wager = %wager.id, refund = %wager.stake, "event wager withdrawn");
        Ok(wager)
    }

    /// Apply the outcome of an event. Irreversible.
    pub async fn resolve_event_wager(
        &self,
        wager_id: WagerId,
        outcome: EventOutcome,
    ) -> Result<Wager, LedgerError> {
        let wager = self
            .resolve(wager_id, outcome.into(), |wager| {
                let Some(event) = wager.event() else {
                    return Err(StateError::WrongWagerKind(wager.id).into());
                };
                Ok(match outcome {
                    EventOutcome::Won => event.potential_payout,
                    EventOutcome::Lost => Amount::ZERO,
                })
            })
            .await?;
        info!(owner = %wager.owner, wager = %wager.id, status = %wager.status, "event wager resolved");
        Ok(wager)
    }

    pub async fn snapshot(&self, owner: &OwnerId) -> Result<WalletSnapshot, LedgerError> {
        self.store
            .snapshot(owner)
            .await?
            .ok_or_else(|| StateError::UnknownWallet(owner.clone()).into())
    }

    pub async fn view(&self, owner: &OwnerId) -> Result<WalletView, LedgerError> {
        Ok(self.snapshot(owner).await?.into())
    }

    /// Pending event wagers whose event started at least `delay_ms` ago.
    pub async fn due_event_wagers(
        &self,
        now_ms: u64,
        delay_ms: u64,
    ) -> Result<Vec<Wager>, LedgerError> {
        let Some(cutoff) = now_ms.checked_sub(delay_ms) else {
            return Ok(Vec::new());
        };
        Ok(self.store.pending_event_wagers(cutoff).await?)
    }

    async fn place<F>(
        &self,
        owner: &OwnerId,
        proposal: Proposal<'_>,
        build: F,
    ) -> Result<Wager, LedgerError>
    where
        F: Fn(Amount) -> Result<Wager, LedgerError>,
    {
        let attempts = self.config.max_commit_attempts.max(1);
        for attempt in 1..=attempts {
            let snapshot = self.snapshot(owner).await?;
            if !snapshot.wallet.profile_complete {
                return Err(ValidationError::ProfileIncomplete.into());
            }
            let stake = validator::validate(proposal, &snapshot, &self.config.limits)?;
            let wager = build(stake)?;
            let batch = Batch::new()
                .expect_version(owner, snapshot.wallet.version)
                .debit(owner, stake)
                .put_wager(wager.clone());
            match self.store.commit(batch).await {
                Ok(()) => return Ok(wager),
                Err(StoreError::Conflict(precondition)) => {
                    debug!(%owner, attempt, ?precondition, "placement conflicted, revalidating");
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!(%owner, attempts, "placement contention");
        Err(InfrastructureError::Contention { attempts }.into())
    }

    /// Move a pending wager to `to`. `prepare` checks the wager, fills in settlement
    /// details and returns the amount to credit.
    async fn resolve<F>(
        &self,
        wager_id: WagerId,
        to: WagerStatus,
        prepare: F,
    ) -> Result<Wager, LedgerError>
    where
        F: Fn(&mut Wager) -> Result<Amount, LedgerError>,
    {
        let attempts = self.config.max_commit_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self
                .store
                .wager(&wager_id)
                .await?
                .ok_or(StateError::UnknownWager(wager_id))?;
            let mut next = current.clone();
            let credit = prepare(&mut next)?;
            next.transition(to)?;

            let batch = Batch::new()
                .expect_status(wager_id, WagerStatus::Pending)
                .credit(&current.owner, credit)
                .put_wager(next.clone());
            match self.store.commit(batch).await {
                Ok(()) => return Ok(next),
                Err(StoreError::Conflict(precondition)) => {
                    debug!(wager = %wager_id, attempt, ?precondition, "resolution conflicted, rereading");
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!(wager = %wager_id, attempts, "resolution contention");
        Err(InfrastructureError::Contention { attempts }.into())
    }
}
