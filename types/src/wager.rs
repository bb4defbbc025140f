use crate::{Amount, StateError};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Opaque owner key issued by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Globally unique wager identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WagerId(Uuid);

impl WagerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for WagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WagerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a crash round, unique per owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a wager. `Pending` is the only non-terminal status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Withdrawn,
    CashedOut,
}

impl WagerStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WagerStatus::Pending => "pending",
            WagerStatus::Won => "won",
            WagerStatus::Lost => "lost",
            WagerStatus::Withdrawn => "withdrawn",
            WagerStatus::CashedOut => "cashed_out",
        }
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an event draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Won,
    Lost,
}

impl From<EventOutcome> for WagerStatus {
    fn from(outcome: EventOutcome) -> Self {
        match outcome {
            EventOutcome::Won => WagerStatus::Won,
            EventOutcome::Lost => WagerStatus::Lost,
        }
    }
}

/// Fixed-odds wager on a scheduled external event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventWager {
    pub event_id: String,
    pub event_description: String,
    pub event_start_ms: u64,
    pub selected_outcome: String,
    pub price_multiplier: f64,
    pub potential_payout: Amount,
}

/// Wager on a crash round; `settled_multiplier` is filled at settlement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundWager {
    pub round_id: RoundId,
    pub auto_cash_out: Option<f64>,
    pub settled_multiplier: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WagerKind {
    Event(EventWager),
    Round(RoundWager),
}

/// A wager record. The core fields are fixed at placement; only `status` (and the
/// round's `settled_multiplier`) change afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub owner: OwnerId,
    pub stake: Amount,
    pub created_at_ms: u64,
    pub status: WagerStatus,
    #[serde(flatten)]
    pub kind: WagerKind,
}

impl Wager {
    pub fn is_pending(&self) -> bool {
        self.status == WagerStatus::Pending
    }

    pub fn event(&self) -> Option<&EventWager> {
        match &self.kind {
            WagerKind::Event(event) => Some(event),
            WagerKind::Round(_) => None,
        }
    }

    pub fn round(&self) -> Option<&RoundWager> {
        match &self.kind {
            WagerKind::Round(round) => Some(round),
            WagerKind::Event(_) => None,
        }
    }

    /// True if this is a pending event wager on `event_id`.
    pub fn blocks_event(&self, event_id: &str) -> bool {
        self.is_pending() && self.event().is_some_and(|event| event.event_id == event_id)
    }

    /// Move out of `Pending`. Terminal statuses never change again.
    pub fn transition(&mut self, to: WagerStatus) -> Result<(), StateError> {
        if self.status.is_terminal() || !to.is_terminal() {
            return Err(StateError::InvalidStateTransition {
                wager: self.id,
                from: self.status,
            });
        }
        self.status = to;
        Ok(())
    }
}
