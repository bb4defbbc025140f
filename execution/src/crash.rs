//! Crash round state machine.
//!
//! A round starts `Running` at multiplier 1.00 and grows on every tick until it
//! either reaches its hidden crash point (`Crashed`) or the player cashes out
//! (`CashedOut`), manually or through an auto cash-out target. Terminal rounds never
//! tick again and yield their settlement until it is marked as applied.
//!
//! The machine does no I/O and reads no clock: the caller supplies `now_ms` and
//! the RNG, and owns the timer that calls [`CrashRound::tick`].
//!
//! ## Crash points
//!
//! Crash points come from a [`CrashDistribution`], a list of buckets each holding a
//! probability and a `(low, high]` range. A bucket with `low == high` is a point
//! mass. The default keeps low crash points much more likely:
//!
//! | probability | crash point |
//! |---|---|
//! | 5%  | 1.00 (instant) |
//! | 55% | (1.00, 2.00] |
//! | 30% | (2.00, 5.00] |
//! | 10% | (5.00, 20.00] |

use rand::Rng;
use serde::{Deserialize, Serialize};
use stakebook_types::{Amount, RoundId, StateError, WagerId, ROUND_START_MULTIPLIER};
use thiserror::Error;

/// Multiplier growth parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoundConfig {
    /// Interval between ticks in milliseconds.
    pub tick_ms: u64,
    /// Proportional growth per tick.
    pub growth_rate: f64,
    /// Lower bound of the per-tick jitter factor.
    pub jitter_min: f64,
    /// Upper bound of the per-tick jitter factor.
    pub jitter_max: f64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            growth_rate: 0.005,
            jitter_min: 0.9,
            jitter_max: 1.1,
        }
    }
}

impl RoundConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.tick_ms == 0 {
            return Err("tick_ms must be greater than zero");
        }
        if !(self.growth_rate.is_finite() && self.growth_rate >= 0.0) {
            return Err("growth_rate must be finite and non-negative");
        }
        if !(self.jitter_min.is_finite() && self.jitter_min >= 0.0) {
            return Err("jitter_min must be finite and non-negative");
        }
        if !(self.jitter_max.is_finite() && self.jitter_max >= self.jitter_min) {
            return Err("jitter_max must be at least jitter_min");
        }
        Ok(())
    }

    /// Next multiplier: `m + 0.01 + m × growth_rate × jitter`.
    pub fn advance(&self, multiplier: f64, rng: &mut impl Rng) -> f64 {
        let jitter = rng.gen_range(self.jitter_min..=self.jitter_max);
        multiplier + 0.01 + multiplier * self.growth_rate * jitter
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrashBucket {
    pub probability: f64,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    #[error("distribution needs at least one bucket")]
    Empty,
    #[error("bucket {index} has an invalid probability {probability}")]
    InvalidProbability { index: usize, probability: f64 },
    #[error("bucket {index} range ({low}, {high}] must satisfy 1.0 <= low <= high")]
    InvalidRange { index: usize, low: f64, high: f64 },
    #[error("bucket probabilities sum to {0}, expected 1.0")]
    NotNormalized(f64),
}

/// Mixed distribution of crash points.
#[derive(Clone, Debug, PartialEq)]
pub struct CrashDistribution {
    buckets: Vec<CrashBucket>,
}

impl Default for CrashDistribution {
    fn default() -> Self {
        Self {
            buckets: vec![
                CrashBucket {
                    probability: 0.05,
                    low: 1.0,
                    high: 1.0,
                },
                CrashBucket {
                    probability: 0.55,
                    low: 1.0,
                    high: 2.0,
                },
                CrashBucket {
                    probability: 0.30,
                    low: 2.0,
                    high: 5.0,
                },
                CrashBucket {
                    probability: 0.10,
                    low: 5.0,
                    high: 20.0,
                },
            ],
        }
    }
}

impl CrashDistribution {
    pub fn new(buckets: Vec<CrashBucket>) -> Result<Self, DistributionError> {
        if buckets.is_empty() {
            return Err(DistributionError::Empty);
        }
        let mut total = 0.0;
        for (index, bucket) in buckets.iter().enumerate() {
            if !(bucket.probability.is_finite() && bucket.probability >= 0.0) {
                return Err(DistributionError::InvalidProbability {
                    index,
                    probability: bucket.probability,
                });
            }
            let valid_range = bucket.low.is_finite()
                && bucket.high.is_finite()
                && bucket.low >= 1.0
                && bucket.high >= bucket.low;
            if !valid_range {
                return Err(DistributionError::InvalidRange {
                    index,
                    low: bucket.low,
                    high: bucket.high,
                });
            }
            total += bucket.probability;
        }
        if (total - 1.0).abs() > 1e-9 {
            return Err(DistributionError::NotNormalized(total));
        }
        Ok(Self { buckets })
    }

    pub fn buckets(&self) -> &[CrashBucket] {
        &self.buckets
    }

    /// Draw a crash point, rounded up to the cent within its bucket.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let roll: f64 = rng.gen();
        let mut cumulative = 0.0;
        let mut chosen = self.buckets[self.buckets.len() - 1];
        for bucket in &self.buckets {
            cumulative += bucket.probability;
            if roll < cumulative {
                chosen = *bucket;
                break;
            }
        }
        if chosen.high <= chosen.low {
            return chosen.low;
        }
        // gen() is in [0, 1), so the draw lands in (low, high].
        let draw = chosen.high - rng.gen::<f64>() * (chosen.high - chosen.low);
        ((draw * 100.0).ceil() / 100.0).min(chosen.high)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Idle,
    Running,
    Crashed,
    CashedOut,
}

impl RoundPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundPhase::Crashed | RoundPhase::CashedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Running => "running",
            RoundPhase::Crashed => "crashed",
            RoundPhase::CashedOut => "cashed_out",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceSample {
    pub elapsed_ms: u64,
    pub multiplier: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RoundOutcome {
    CashedOut { multiplier: f64 },
    Crashed { crash_point: f64 },
}

/// What the ledger must apply once a round is terminal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settlement {
    pub round: RoundId,
    pub wager: WagerId,
    pub stake: Amount,
    pub outcome: RoundOutcome,
}

/// Renderable state of a round. The crash point stays hidden while running.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub round_id: Option<RoundId>,
    pub phase: RoundPhase,
    pub multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stake: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cash_out: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Amount>,
    pub trace: Vec<TraceSample>,
}

impl RoundView {
    pub fn idle() -> Self {
        Self {
            round_id: None,
            phase: RoundPhase::Idle,
            multiplier: ROUND_START_MULTIPLIER,
            crash_point: None,
            stake: None,
            auto_cash_out: None,
            payout: None,
            trace: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CrashRound {
    id: RoundId,
    wager: WagerId,
    stake: Amount,
    auto_cash_out: Option<f64>,
    crash_point: f64,
    started_at_ms: u64,
    multiplier: f64,
    phase: RoundPhase,
    trace: Vec<TraceSample>,
    settled: bool,
}

impl CrashRound {
    /// Enter `Running`. A crash point at or below the starting multiplier crashes
    /// the round immediately.
    pub fn start(
        id: RoundId,
        wager: WagerId,
        stake: Amount,
        auto_cash_out: Option<f64>,
        crash_point: f64,
        now_ms: u64,
    ) -> Self {
        let crash_point = crash_point.max(ROUND_START_MULTIPLIER);
        let mut round = Self {
            id,
            wager,
            stake,
            auto_cash_out,
            crash_point,
            started_at_ms: now_ms,
            multiplier: ROUND_START_MULTIPLIER,
            phase: RoundPhase::Running,
            trace: vec![TraceSample {
                elapsed_ms: 0,
                multiplier: ROUND_START_MULTIPLIER,
            }],
            settled: false,
        };
        if round.multiplier >= round.crash_point {
            round.multiplier = round.crash_point;
            round.phase = RoundPhase::Crashed;
        }
        round
    }

    pub fn id(&self) -> RoundId {
        self.id
    }

    pub fn wager(&self) -> WagerId {
        self.wager
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn crash_point(&self) -> f64 {
        self.crash_point
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn trace(&self) -> &[TraceSample] {
        &self.trace
    }

    pub fn is_running(&self) -> bool {
        self.phase == RoundPhase::Running
    }

    /// Advance one tick. Does nothing once the round is terminal.
    pub fn tick(&mut self, now_ms: u64, config: &RoundConfig, rng: &mut impl Rng) -> RoundPhase {
        if !self.is_running() {
            return self.phase;
        }
        let next = config.advance(self.multiplier, rng);

        if let Some(target) = self.auto_cash_out {
            if target < self.crash_point && next >= target {
                self.multiplier = next.min(self.crash_point);
                self.phase = RoundPhase::CashedOut;
                self.record(now_ms);
                return self.phase;
            }
        }
        if next >= self.crash_point {
            self.multiplier = self.crash_point;
            self.phase = RoundPhase::Crashed;
        } else {
            self.multiplier = next;
        }
        self.record(now_ms);
        self.phase
    }

    /// Manual cash-out at the current multiplier.
    pub fn cash_out(&mut self, now_ms: u64) -> Result<f64, StateError> {
        if !self.is_running() {
            return Err(StateError::RoundNotRunning);
        }
        self.phase = RoundPhase::CashedOut;
        self.record(now_ms);
        Ok(self.multiplier)
    }

    /// Final multiplier of a terminal round.
    pub fn final_multiplier(&self) -> Option<f64> {
        self.phase.is_terminal().then_some(self.multiplier)
    }

    /// Settlement still owed to the ledger, if the round is terminal.
    pub fn settlement(&self) -> Option<Settlement> {
        if self.settled {
            return None;
        }
        let outcome = match self.phase {
            RoundPhase::CashedOut => RoundOutcome::CashedOut {
                multiplier: self.multiplier,
            },
            RoundPhase::Crashed => RoundOutcome::Crashed {
                crash_point: self.crash_point,
            },
            RoundPhase::Idle | RoundPhase::Running => return None,
        };
        Some(Settlement {
            round: self.id,
            wager: self.wager,
            stake: self.stake,
            outcome,
        })
    }

    pub fn mark_settled(&mut self) {
        self.settled = true;
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn view(&self) -> RoundView {
        let terminal = self.phase.is_terminal();
        let payout = match self.phase {
            RoundPhase::CashedOut => self.stake.scale(self.multiplier),
            RoundPhase::Crashed => Some(Amount::ZERO),
            RoundPhase::Idle | RoundPhase::Running => None,
        };
        RoundView {
            round_id: Some(self.id),
            phase: self.phase,
            multiplier: self.multiplier,
            crash_point: terminal.then_some(self.crash_point),
            stake: Some(self.stake),
            auto_cash_out: self.auto_cash_out,
            payout,
            trace: self.trace.clone(),
        }
    }

    fn record(&mut self, now_ms: u64) {
        self.trace.push(TraceSample {
            elapsed_ms: now_ms.saturating_sub(self.started_at_ms),
            multiplier: self.multiplier,
        });
    }
}
