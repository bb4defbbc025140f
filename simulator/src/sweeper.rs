use crate::{backoff::retry, config::SweeperConfig, Clock, Metrics};
use futures::stream::{self, StreamExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use stakebook_execution::{Ledger, Store};
use stakebook_types::{EventOutcome, LedgerError, Wager, WagerStatus};
use std::sync::{Arc, Mutex};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Tally of one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub won: usize,
    pub lost: usize,
    pub already_resolved: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn resolved(&self) -> usize {
        self.won + self.lost
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

enum Resolution {
    Resolved(WagerStatus),
    AlreadyResolved,
    Failed,
}

/// Periodically resolves event wagers whose event has started.
pub struct Sweeper<S: Store> {
    ledger: Arc<Ledger<S>>,
    config: SweeperConfig,
    clock: Clock,
    metrics: Arc<Metrics>,
    rng: Mutex<StdRng>,
}

impl<S: Store + 'static> Sweeper<S> {
    pub fn new(
        ledger: Arc<Ledger<S>>,
        config: SweeperConfig,
        clock: Clock,
        metrics: Arc<Metrics>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            ledger,
            config,
            clock,
            metrics,
            rng: Mutex::new(rng),
        }
    }

    fn draw(&self) -> EventOutcome {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if rng.gen_bool(self.config.win_probability) {
            EventOutcome::Won
        } else {
            EventOutcome::Lost
        }
    }

    /// Resolve every due event wager once.
    pub async fn sweep(&self) -> SweepReport {
        self.metrics.inc_sweeper_pass();
        let now = self.clock.now_ms();
        let delay = self.config.resolution_delay_ms;
        let ledger = &self.ledger;
        let due = match retry(&self.config.retry, "sweeper scan", move |_| {
            ledger.due_event_wagers(now, delay)
        })
        .await
        {
            Ok(due) => due,
            Err(err) => {
                error!(%err, "sweeper scan failed");
                return SweepReport {
                    failed: 1,
                    ..SweepReport::default()
                };
            }
        };

        let resolutions: Vec<Resolution> = stream::iter(due)
            .map(|wager| self.resolve(wager))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for resolution in resolutions {
            match resolution {
                Resolution::Resolved(WagerStatus::Won) => report.won += 1,
                Resolution::Resolved(_) => report.lost += 1,
                Resolution::AlreadyResolved => report.already_resolved += 1,
                Resolution::Failed => report.failed += 1,
            }
        }
        report
    }

    async fn resolve(&self, wager: Wager) -> Resolution {
        // Drawn once so that retries apply the same outcome.
        let outcome = self.draw();
        let ledger = &self.ledger;
        let metrics = &self.metrics;
        let id = wager.id;
        let result = retry(&self.config.retry, "event resolution", move |attempt| {
            if attempt > 1 {
                metrics.inc_sweeper_retry();
            }
            ledger.resolve_event_wager(id, outcome)
        })
        .await;

        match result {
            Ok(resolved) => {
                self.metrics.inc_settlement(resolved.status.as_str());
                Resolution::Resolved(resolved.status)
            }
            Err(LedgerError::State(err)) => {
                debug!(wager = %id, %err, "skipping resolved wager");
                Resolution::AlreadyResolved
            }
            Err(err) => {
                error!(wager = %id, owner = %wager.owner, %err, "event resolution failed");
                Resolution::Failed
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval;
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let report = self.sweep().await;
                if report.is_empty() {
                    debug!("sweep found nothing due");
                } else {
                    info!(
                        won = report.won,
                        lost = report.lost,
                        already_resolved = report.already_resolved,
                        failed = report.failed,
                        "sweep finished"
                    );
                }
            }
        })
    }
}
