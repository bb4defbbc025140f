//! Stakebook execution layer.
//!
//! This crate contains the wager validator, withdrawal policy, crash round state
//! machine and the wallet [Ledger] generic over a [Store].
//!
//! ## Determinism requirements
//! - Do not read the wall clock here. Every time-dependent operation takes `now_ms`.
//! - Randomness is always supplied by the caller (`&mut impl Rng`), so seeded
//!   runs are reproducible.
//!
//! ## Consistency
//! Balances and wager statuses change only through [Ledger] operations, each of
//! which is one atomic store batch guarded by preconditions. The sum of the balance
//! and all pending stakes changes only through deposits and settlement credits.
//!
//! ## Placing and settling a round (example)
//! ```rust,ignore
//! use rand::{rngs::StdRng, SeedableRng};
//! use stakebook_execution::{
//!     CrashDistribution, CrashRound, Ledger, LedgerConfig, MemoryStore, RoundConfig,
//!     RoundOutcome,
//! };
//! use stakebook_types::{Identity, RoundId, RoundWagerIntent};
//!
//! # async fn example() -> Result<(), stakebook_types::LedgerError> {
//! let ledger = Ledger::new(MemoryStore::new(), LedgerConfig::default());
//! let identity = Identity::new("alice", true);
//! ledger.open_wallet(&identity).await?;
//! ledger.add_funds(&identity.owner, 50.0).await?;
//!
//! let intent = RoundWagerIntent { stake: 10.0, auto_cash_out: Some(2.0) };
//! let wager = ledger.place_round_wager(&identity.owner, &intent, RoundId(1), 0).await?;
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let crash_point = CrashDistribution::default().sample(&mut rng);
//! let mut round = CrashRound::start(RoundId(1), wager.id, wager.stake, intent.auto_cash_out, crash_point, 0);
//! let config = RoundConfig::default();
//! let mut now = 0;
//! while round.is_running() {
//!     now += config.tick_ms;
//!     round.tick(now, &config, &mut rng);
//! }
//! if let Some(settlement) = round.settlement() {
//!     match settlement.outcome {
//!         RoundOutcome::CashedOut { multiplier } => ledger.settle_round_wager(settlement.wager, multiplier).await?,
//!         RoundOutcome::Crashed { crash_point } => ledger.forfeit_round_wager(settlement.wager, crash_point).await?,
//!     };
//!     round.mark_settled();
//! }
//! # Ok(())
//! # }
//! ```

pub mod crash;
pub mod ledger;
pub mod state;
pub mod validator;
pub mod withdrawal;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use crash::{
    CrashBucket, CrashDistribution, CrashRound, DistributionError, RoundConfig, RoundOutcome,
    RoundPhase, RoundView, Settlement, TraceSample,
};
pub use ledger::{Ledger, LedgerConfig};
pub use state::{Batch, MemoryStore, Op, Precondition, Store, StoreError};
pub use validator::{validate, Proposal, WagerLimits};
pub use withdrawal::{can_withdraw, WithdrawalPolicy};
