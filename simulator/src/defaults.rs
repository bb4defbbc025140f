//! Default values for [crate::Config].

use stakebook_types::{
    CENTS_PER_UNIT, EVENT_WIN_PROBABILITY, MAX_AUTO_CASH_OUT, MAX_STAKE_CENTS, MIN_AUTO_CASH_OUT,
    MIN_STAKE_CENTS, WITHDRAWAL_CUTOFF_MS,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_MIN_STAKE: f64 = MIN_STAKE_CENTS as f64 / CENTS_PER_UNIT as f64;
pub const DEFAULT_MAX_STAKE: f64 = MAX_STAKE_CENTS as f64 / CENTS_PER_UNIT as f64;
pub const DEFAULT_MIN_AUTO_CASH_OUT: f64 = MIN_AUTO_CASH_OUT;
pub const DEFAULT_MAX_AUTO_CASH_OUT: f64 = MAX_AUTO_CASH_OUT;
pub const DEFAULT_WITHDRAWAL_CUTOFF_MS: u64 = WITHDRAWAL_CUTOFF_MS;
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: usize = 4;
pub const DEFAULT_STARTING_BALANCE: f64 = 0.0;

pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_GROWTH_RATE: f64 = 0.005;
pub const DEFAULT_JITTER_MIN: f64 = 0.9;
pub const DEFAULT_JITTER_MAX: f64 = 1.1;
pub const DEFAULT_SETTLEMENT_RETRY_ATTEMPTS: usize = 3;

pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_RESOLUTION_DELAY_MS: u64 = 0;
pub const DEFAULT_WIN_PROBABILITY: f64 = EVENT_WIN_PROBABILITY;
pub const DEFAULT_SWEEP_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_SWEEP_RETRY_BASE_MS: u64 = 200;
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 8;

pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 16 * 1024;
