//! Common types used throughout stakebook.
//!
//! Amounts, identifiers, wager records, presentation intents and the error
//! taxonomy shared by the execution core and the simulator backend.

mod amount;
mod constants;
mod error;
mod intent;
mod wager;
mod wallet;

pub use amount::{Amount, CENTS_PER_UNIT};
pub use constants::*;
pub use error::{
    ErrorKind, InfrastructureError, LedgerError, StateError, ValidationError,
};
pub use intent::{EventWagerIntent, Intent, RoundWagerIntent};
pub use wager::{
    EventOutcome, EventWager, OwnerId, RoundId, RoundWager, Wager, WagerId, WagerKind,
    WagerStatus,
};
pub use wallet::{Identity, Wallet, WalletSnapshot, WalletView};
