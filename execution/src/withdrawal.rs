use stakebook_types::{ValidationError, WITHDRAWAL_CUTOFF_MS};

/// True if the event is still more than `cutoff_ms` away.
pub fn can_withdraw(event_start_ms: u64, now_ms: u64, cutoff_ms: u64) -> bool {
    event_start_ms
        .checked_sub(now_ms)
        .is_some_and(|remaining| remaining > cutoff_ms)
}

/// Cutoff window gating refunds of pending event wagers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithdrawalPolicy {
    pub cutoff_ms: u64,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            cutoff_ms: WITHDRAWAL_CUTOFF_MS,
        }
    }
}

impl WithdrawalPolicy {
    pub fn new(cutoff_ms: u64) -> Self {
        Self { cutoff_ms }
    }

    pub fn check(&self, event_start_ms: u64, now_ms: u64) -> Result<(), ValidationError> {
        if can_withdraw(event_start_ms, now_ms, self.cutoff_ms) {
            return Ok(());
        }
        Err(ValidationError::WithdrawalWindowClosed {
            remaining_ms: event_start_ms.saturating_sub(now_ms),
            cutoff_ms: self.cutoff_ms,
        })
    }
}
