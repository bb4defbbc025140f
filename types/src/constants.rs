/// Minimum stake accepted for any wager.
pub const MIN_STAKE_CENTS: u64 = 100;

/// Maximum stake accepted for any wager.
pub const MAX_STAKE_CENTS: u64 = 1_000_000;

/// Smallest auto cash-out target (must stay above 1.0).
pub const MIN_AUTO_CASH_OUT: f64 = 1.01;

/// Largest auto cash-out target.
pub const MAX_AUTO_CASH_OUT: f64 = 100.0;

/// Event wagers can no longer be withdrawn this close to the event start (5 minutes).
pub const WITHDRAWAL_CUTOFF_MS: u64 = 5 * 60 * 1_000;

/// Probability that the sweeper resolves an event wager as won.
pub const EVENT_WIN_PROBABILITY: f64 = 0.40;

/// Starting multiplier of every crash round.
pub const ROUND_START_MULTIPLIER: f64 = 1.0;

/// Longest owner id accepted from the authentication layer.
pub const MAX_OWNER_ID_LEN: usize = 128;
