use crate::{Amount, OwnerId, Wager};
use serde::{Deserialize, Serialize};

/// Identity supplied by the external identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub owner: OwnerId,
    pub profile_complete: bool,
}

impl Identity {
    pub fn new(owner: impl Into<OwnerId>, profile_complete: bool) -> Self {
        Self {
            owner: owner.into(),
            profile_complete,
        }
    }
}

/// Wallet document for one owner.
///
/// `version` increases with every committed change and serves as the
/// compare-and-set token for placements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub owner: OwnerId,
    pub balance: Amount,
    pub profile_complete: bool,
    pub version: u64,
}

impl Wallet {
    pub fn new(owner: OwnerId, profile_complete: bool) -> Self {
        Self {
            owner,
            balance: Amount::ZERO,
            profile_complete,
            version: 0,
        }
    }
}

/// Consistent read of one owner's wallet and wager set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub wallet: Wallet,
    pub wagers: Vec<Wager>,
}

impl WalletSnapshot {
    pub fn balance(&self) -> Amount {
        self.wallet.balance
    }

    /// Sum of stakes still held by pending wagers.
    pub fn pending_stake(&self) -> Amount {
        self.wagers
            .iter()
            .filter(|wager| wager.is_pending())
            .map(|wager| wager.stake)
            .sum()
    }

    pub fn has_pending_event_wager(&self, event_id: &str) -> bool {
        self.wagers.iter().any(|wager| wager.blocks_event(event_id))
    }
}

/// What the presentation layer renders after every confirmed ledger response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletView {
    pub owner: OwnerId,
    pub balance: Amount,
    pub pending_stake: Amount,
    pub profile_complete: bool,
    pub wagers: Vec<Wager>,
}

impl From<WalletSnapshot> for WalletView {
    fn from(snapshot: WalletSnapshot) -> Self {
        let pending_stake = snapshot.pending_stake();
        let mut wagers = snapshot.wagers;
        wagers.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        Self {
            owner: snapshot.wallet.owner,
            balance: snapshot.wallet.balance,
            pending_stake,
            profile_complete: snapshot.wallet.profile_complete,
            wagers,
        }
    }
}
