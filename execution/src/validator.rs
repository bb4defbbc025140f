//! Wager validation policy.
//!
//! Validation is pure: it looks only at the proposal, a wallet snapshot and the
//! configured limits. The ledger runs it against the snapshot it is about to
//! commit over, so a stale snapshot fails the commit instead of overdrawing.

use stakebook_types::{
    Amount, EventWagerIntent, RoundWagerIntent, ValidationError, WalletSnapshot,
    MAX_AUTO_CASH_OUT, MAX_STAKE_CENTS, MIN_AUTO_CASH_OUT, MIN_STAKE_CENTS,
};

/// Stake and auto cash-out bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WagerLimits {
    pub min_stake: Amount,
    pub max_stake: Amount,
    pub min_target: f64,
    pub max_target: f64,
}

impl Default for WagerLimits {
    fn default() -> Self {
        Self {
            min_stake: Amount::from_cents(MIN_STAKE_CENTS),
            max_stake: Amount::from_cents(MAX_STAKE_CENTS),
            min_target: MIN_AUTO_CASH_OUT,
            max_target: MAX_AUTO_CASH_OUT,
        }
    }
}

impl WagerLimits {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.min_stake.is_zero() {
            return Err("min_stake must be greater than zero");
        }
        if self.max_stake < self.min_stake {
            return Err("max_stake must be at least min_stake");
        }
        if !(self.min_target.is_finite() && self.min_target > 1.0) {
            return Err("min_target must be greater than 1.0");
        }
        if !(self.max_target.is_finite() && self.max_target >= self.min_target) {
            return Err("max_target must be at least min_target");
        }
        Ok(())
    }
}

/// A wager about to be placed.
#[derive(Clone, Copy, Debug)]
pub enum Proposal<'a> {
    Event(&'a EventWagerIntent),
    Round(&'a RoundWagerIntent),
}

impl Proposal<'_> {
    fn stake(&self) -> f64 {
        match self {
            Proposal::Event(intent) => intent.stake,
            Proposal::Round(intent) => intent.stake,
        }
    }
}

/// Check a proposal against the snapshot. Rules run in order and the first failure
/// wins. On success the stake is returned rounded to the cent.
pub fn validate(
    proposal: Proposal<'_>,
    snapshot: &WalletSnapshot,
    limits: &WagerLimits,
) -> Result<Amount, ValidationError> {
    let raw = proposal.stake();
    if !raw.is_finite() || raw <= 0.0 {
        return Err(ValidationError::InvalidStake(raw));
    }
    // Anything too large to represent is certainly above the maximum.
    let stake = Amount::from_decimal(raw).unwrap_or(Amount::from_cents(u64::MAX));

    if stake < limits.min_stake {
        return Err(ValidationError::InsufficientStake {
            stake,
            min: limits.min_stake,
        });
    }
    if stake > limits.max_stake {
        return Err(ValidationError::ExcessiveStake {
            stake,
            max: limits.max_stake,
        });
    }
    let balance = snapshot.balance();
    if stake > balance {
        return Err(ValidationError::InsufficientBalance { stake, balance });
    }

    match proposal {
        Proposal::Event(intent) => {
            if snapshot.has_pending_event_wager(&intent.event_id) {
                return Err(ValidationError::DuplicateEventWager {
                    event_id: intent.event_id.clone(),
                });
            }
            if !intent.price_multiplier.is_finite() || intent.price_multiplier < 0.0 {
                return Err(ValidationError::InvalidPriceMultiplier(
                    intent.price_multiplier,
                ));
            }
        }
        Proposal::Round(intent) => {
            if let Some(target) = intent.auto_cash_out {
                let in_range = target.is_finite()
                    && target > 1.0
                    && target >= limits.min_target
                    && target <= limits.max_target;
                if !in_range {
                    return Err(ValidationError::InvalidAutoCashOutTarget {
                        target,
                        min: limits.min_target,
                        max: limits.max_target,
                    });
                }
            }
        }
    }

    Ok(stake)
}
