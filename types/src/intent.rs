//! Commands forwarded by the presentation layer.

use crate::WagerId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventWagerIntent {
    pub event_id: String,
    #[serde(default)]
    pub event_description: String,
    pub selected_outcome: String,
    pub stake: f64,
    pub price_multiplier: f64,
    pub event_start_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundWagerIntent {
    pub stake: f64,
    #[serde(default)]
    pub auto_cash_out: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    AddFunds { amount: f64 },
    PlaceEventWager(EventWagerIntent),
    PlaceRoundWager(RoundWagerIntent),
    CashOut,
    WithdrawEventWager { wager_id: WagerId },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::AddFunds { .. } => "add_funds",
            Intent::PlaceEventWager(_) => "place_event_wager",
            Intent::PlaceRoundWager(_) => "place_round_wager",
            Intent::CashOut => "cash_out",
            Intent::WithdrawEventWager { .. } => "withdraw_event_wager",
        }
    }
}
