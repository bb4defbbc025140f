//! Test helpers: a [Store] wrapper that injects failures.

use crate::state::{Batch, Precondition, Store, StoreError};
use stakebook_types::{Amount, Identity, OwnerId, Wager, WagerId, WagerStatus, Wallet, WalletSnapshot};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wraps a store and fails a configurable number of upcoming calls.
///
/// Injected commit conflicts look like a concurrent writer got there first;
/// injected outages look like the backing store is unreachable.
pub struct FlakyStore<S> {
    inner: S,
    conflicts: AtomicUsize,
    commit_outages: AtomicUsize,
    read_outages: AtomicUsize,
    commits: AtomicUsize,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            conflicts: AtomicUsize::new(0),
            commit_outages: AtomicUsize::new(0),
            read_outages: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `n` commits with a version conflict.
    pub fn conflict_next_commits(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` commits with [StoreError::Unavailable].
    pub fn fail_next_commits(&self, n: usize) {
        self.commit_outages.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads with [StoreError::Unavailable].
    pub fn fail_next_reads(&self, n: usize) {
        self.read_outages.store(n, Ordering::SeqCst);
    }

    /// Commits attempted so far, including injected failures.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read_outage(&self) -> Result<(), StoreError> {
        if Self::take(&self.read_outages) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

impl<S: Store> Store for FlakyStore<S> {
    async fn ensure_wallet(&self, identity: &Identity, initial: Amount) -> Result<Wallet, StoreError> {
        self.read_outage()?;
        self.inner.ensure_wallet(identity, initial).await
    }

    async fn snapshot(&self, owner: &OwnerId) -> Result<Option<WalletSnapshot>, StoreError> {
        self.read_outage()?;
        self.inner.snapshot(owner).await
    }

    async fn wager(&self, id: &WagerId) -> Result<Option<Wager>, StoreError> {
        self.read_outage()?;
        self.inner.wager(id).await
    }

    async fn pending_event_wagers(&self, starts_at_or_before_ms: u64) -> Result<Vec<Wager>, StoreError> {
        self.read_outage()?;
        self.inner.pending_event_wagers(starts_at_or_before_ms).await
    }

    async fn increment(&self, owner: &OwnerId, amount: Amount) -> Result<Amount, StoreError> {
        self.read_outage()?;
        self.inner.increment(owner, amount).await
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.commit_outages) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }
        if Self::take(&self.conflicts) {
            return Err(StoreError::Conflict(Precondition::Status {
                wager: WagerId::from_u128(0),
                expected: WagerStatus::Pending,
                actual: None,
            }));
        }
        self.inner.commit(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = FlakyStore::new(MemoryStore::new());
        let identity = Identity::new("alice", true);
        store.ensure_wallet(&identity, Amount::ZERO).await.unwrap();

        store.fail_next_reads(1);
        assert!(matches!(
            store.snapshot(&identity.owner).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.snapshot(&identity.owner).await.unwrap().is_some());

        store.conflict_next_commits(1);
        assert!(matches!(
            store.commit(Batch::new()).await,
            Err(StoreError::Conflict(_))
        ));
        store.commit(Batch::new()).await.unwrap();
        assert_eq!(store.commits(), 2);
    }
}
