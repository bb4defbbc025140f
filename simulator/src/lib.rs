use serde::Serialize;
use stakebook_execution::{Ledger, RoundView, Store};
use stakebook_types::{Identity, Intent, LedgerError, Wager, Wallet, WalletView};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

mod api;
pub use api::Api;

mod backoff;
pub use backoff::RetryPolicy;
mod clock;
pub use clock::Clock;
mod config;
pub use config::{Config, ConfigError, HttpConfig, SweeperConfig, ValidatedConfig};
pub mod defaults;
mod metrics;
pub use metrics::Metrics;
mod rounds;
pub use rounds::RoundDriver;
mod sweeper;
pub use sweeper::{SweepReport, Sweeper};

/// Result of a confirmed intent. `wallet` is read after the commit, so it is what
/// the presentation layer should render.
#[derive(Clone, Debug, Serialize)]
pub struct Receipt {
    pub wallet: WalletView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wager: Option<Wager>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<RoundView>,
}

/// The backend: ledger, round driver and sweeper over one store.
pub struct Simulator<S: Store> {
    config: ValidatedConfig,
    ledger: Arc<Ledger<S>>,
    rounds: RoundDriver<S>,
    sweeper: Arc<Sweeper<S>>,
    clock: Clock,
    metrics: Arc<Metrics>,
}

impl<S: Store + 'static> Simulator<S> {
    pub fn new(config: ValidatedConfig, store: S) -> Self {
        Self::with_clock(config, store, Clock::system())
    }

    pub fn with_clock(config: ValidatedConfig, store: S, clock: Clock) -> Self {
        let metrics = Arc::new(Metrics::new());
        let ledger = Arc::new(Ledger::new(store, config.ledger));
        // Offset the sweeper seed so its draws are not correlated with crash points.
        let rounds = RoundDriver::new(
            ledger.clone(),
            config.round,
            config.distribution.clone(),
            config.settlement_retry,
            clock,
            metrics.clone(),
            config.seed,
        );
        let sweeper = Arc::new(Sweeper::new(
            ledger.clone(),
            config.sweeper.clone(),
            clock,
            metrics.clone(),
            config.seed.map(|seed| seed.wrapping_add(1)),
        ));
        Self {
            config,
            ledger,
            rounds,
            sweeper,
            clock,
            metrics,
        }
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger<S>> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn sweeper(&self) -> &Arc<Sweeper<S>> {
        &self.sweeper
    }

    /// Open the caller's wallet if needed and refresh its profile flag.
    pub async fn open(&self, identity: &Identity) -> Result<Wallet, LedgerError> {
        self.ledger.open_wallet(identity).await
    }

    /// Apply one presentation intent on behalf of `identity`.
    pub async fn dispatch(
        &self,
        identity: &Identity,
        intent: Intent,
    ) -> Result<Receipt, LedgerError> {
        let name = intent.name();
        let result = self.apply(identity, intent).await;
        if let Err(err) = &result {
            self.metrics.inc_rejected(err.kind().as_str());
            debug!(owner = %identity.owner, intent = name, code = err.code(), %err, "intent rejected");
        }
        result
    }

    async fn apply(&self, identity: &Identity, intent: Intent) -> Result<Receipt, LedgerError> {
        self.open(identity).await?;
        let owner = &identity.owner;
        let mut wager = None;
        let mut round = None;
        match intent {
            Intent::AddFunds { amount } => {
                self.ledger.add_funds(owner, amount).await?;
            }
            Intent::PlaceEventWager(intent) => {
                let placed = self
                    .ledger
                    .place_event_wager(owner, &intent, self.clock.now_ms())
                    .await?;
                self.metrics.inc_wager_placed("event");
                wager = Some(placed);
            }
            Intent::PlaceRoundWager(intent) => {
                round = Some(self.rounds.start(owner, &intent).await?);
            }
            Intent::CashOut => {
                round = Some(self.rounds.cash_out(owner).await?);
            }
            Intent::WithdrawEventWager { wager_id } => {
                let withdrawn = self
                    .ledger
                    .withdraw_event_wager(owner, wager_id, self.clock.now_ms())
                    .await?;
                self.metrics.inc_settlement(withdrawn.status.as_str());
                wager = Some(withdrawn);
            }
        }
        Ok(Receipt {
            wallet: self.ledger.view(owner).await?,
            wager,
            round,
        })
    }

    pub async fn view(&self, identity: &Identity) -> Result<WalletView, LedgerError> {
        self.open(identity).await?;
        self.ledger.view(&identity.owner).await
    }

    pub async fn round(&self, identity: &Identity) -> RoundView {
        self.rounds.view(&identity.owner).await
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.sweeper.clone().spawn()
    }

    pub async fn shutdown(&self) {
        self.rounds.shutdown().await;
    }
}
