//! Error taxonomy shared by the ledger, the round driver and the API.
//!
//! - [`ValidationError`]: user-correctable, surfaced verbatim, never retried.
//! - [`StateError`]: the target was already resolved elsewhere, never retried.
//! - [`InfrastructureError`]: the store failed; retried only by unattended callers.

use crate::{Amount, OwnerId, RoundId, WagerId, WagerStatus};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("stake must be a finite positive amount (got {0})")]
    InvalidStake(f64),
    #[error("stake {stake} is below the minimum of {min}")]
    InsufficientStake { stake: Amount, min: Amount },
    #[error("stake {stake} exceeds the maximum of {max}")]
    ExcessiveStake { stake: Amount, max: Amount },
    #[error("stake {stake} exceeds the available balance of {balance}")]
    InsufficientBalance { stake: Amount, balance: Amount },
    #[error("a pending wager already exists for event {event_id}")]
    DuplicateEventWager { event_id: String },
    #[error("auto cash-out target {target} must be within [{min}, {max}]")]
    InvalidAutoCashOutTarget { target: f64, min: f64, max: f64 },
    #[error("price multiplier must be finite and non-negative (got {0})")]
    InvalidPriceMultiplier(f64),
    #[error("amount must be a finite positive value (got {0})")]
    InvalidAmount(f64),
    #[error("profile must be completed before wagering")]
    ProfileIncomplete,
    #[error("too close to start: {remaining_ms}ms left, withdrawals close {cutoff_ms}ms before start")]
    WithdrawalWindowClosed { remaining_ms: u64, cutoff_ms: u64 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("wager {wager} is already {from}")]
    InvalidStateTransition { wager: WagerId, from: WagerStatus },
    #[error("unknown wager {0}")]
    UnknownWager(WagerId),
    #[error("wager {0} does not support this operation")]
    WrongWagerKind(WagerId),
    #[error("unknown wallet {0}")]
    UnknownWallet(OwnerId),
    #[error("no round is running")]
    RoundNotRunning,
    #[error("round {0} is still running")]
    RoundInProgress(RoundId),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InfrastructureError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("commit contention persisted after {attempts} attempts")]
    Contention { attempts: usize },
    #[error("balance arithmetic overflow")]
    Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::State => "state",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::State(_) => ErrorKind::State,
            LedgerError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code for the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(err) => match err {
                ValidationError::InvalidStake(_) => "INVALID_STAKE",
                ValidationError::InsufficientStake { .. } => "INSUFFICIENT_STAKE",
                ValidationError::ExcessiveStake { .. } => "EXCESSIVE_STAKE",
                ValidationError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
                ValidationError::DuplicateEventWager { .. } => "DUPLICATE_EVENT_WAGER",
                ValidationError::InvalidAutoCashOutTarget { .. } => "INVALID_AUTO_CASH_OUT_TARGET",
                ValidationError::InvalidPriceMultiplier(_) => "INVALID_PRICE_MULTIPLIER",
                ValidationError::InvalidAmount(_) => "INVALID_AMOUNT",
                ValidationError::ProfileIncomplete => "PROFILE_INCOMPLETE",
                ValidationError::WithdrawalWindowClosed { .. } => "TOO_CLOSE_TO_START",
            },
            LedgerError::State(err) => match err {
                StateError::InvalidStateTransition { .. } => "ALREADY_RESOLVED",
                StateError::UnknownWager(_) => "UNKNOWN_WAGER",
                StateError::WrongWagerKind(_) => "WRONG_WAGER_KIND",
                StateError::UnknownWallet(_) => "UNKNOWN_WALLET",
                StateError::RoundNotRunning => "ROUND_NOT_RUNNING",
                StateError::RoundInProgress(_) => "ROUND_IN_PROGRESS",
            },
            LedgerError::Infrastructure(err) => match err {
                InfrastructureError::Unavailable(_) => "STORE_UNAVAILABLE",
                InfrastructureError::Contention { .. } => "CONTENTION",
                InfrastructureError::Overflow => "OVERFLOW",
            },
        }
    }

    /// Transient store failures. An overflowing credit fails the same way every
    /// time and is not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Infrastructure(
                InfrastructureError::Unavailable(_) | InfrastructureError::Contention { .. }
            )
        )
    }
}
