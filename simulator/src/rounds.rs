//! Round driver: one crash round slot per owner and one timer task per running round.
//!
//! Every slot sits behind an async mutex. Placement, manual cash-out and each tick
//! take that lock, so a tick never interleaves with a cash-out of the same round.
//! A tick also re-checks that the slot still holds its round and that the round is
//! running before touching it.

use crate::{
    backoff::{retry, RetryPolicy},
    Clock, Metrics,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use stakebook_execution::{
    CrashDistribution, CrashRound, Ledger, RoundConfig, RoundOutcome, RoundView, Store,
};
use stakebook_types::{LedgerError, OwnerId, RoundId, RoundWagerIntent, StateError};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Slot count at which new owners first trigger a sweep of idle slots.
const PRUNE_THRESHOLD: usize = 1_024;

#[derive(Default)]
struct Slot {
    round: Option<CrashRound>,
    ticker: Option<JoinHandle<()>>,
}

impl Slot {
    /// No timer, and any finished round has been applied to the ledger.
    fn is_idle(&self) -> bool {
        self.ticker.is_none()
            && self
                .round
                .as_ref()
                .map_or(true, |round| !round.is_running() && round.is_settled())
    }
}

/// State shared with the ticker tasks.
struct Shared<S: Store> {
    ledger: Arc<Ledger<S>>,
    config: RoundConfig,
    retry: RetryPolicy,
    clock: Clock,
    metrics: Arc<Metrics>,
}

impl<S: Store> Shared<S> {
    /// Apply whatever settlement the round still owes. A state error means the
    /// wager was already settled and counts as applied.
    async fn settle(&self, owner: &OwnerId, round: &mut CrashRound) -> Result<(), LedgerError> {
        let Some(settlement) = round.settlement() else {
            return Ok(());
        };
        let ledger = &self.ledger;
        let result = retry(&self.retry, "round settlement", move |_| async move {
            match settlement.outcome {
                RoundOutcome::CashedOut { multiplier } => {
                    ledger.settle_round_wager(settlement.wager, multiplier).await
                }
                RoundOutcome::Crashed { crash_point } => {
                    ledger.forfeit_round_wager(settlement.wager, crash_point).await
                }
            }
        })
        .await;

        match result {
            Ok(wager) => {
                round.mark_settled();
                self.metrics.inc_settlement(wager.status.as_str());
                self.metrics.inc_round(round.phase().as_str());
                Ok(())
            }
            Err(LedgerError::State(err)) => {
                debug!(%owner, round = %settlement.round, %err, "round already settled");
                round.mark_settled();
                Ok(())
            }
            Err(err) => {
                error!(%owner, round = %settlement.round, %err, "round settlement failed");
                Err(err)
            }
        }
    }
}

pub struct RoundDriver<S: Store> {
    shared: Arc<Shared<S>>,
    distribution: CrashDistribution,
    slots: StdMutex<HashMap<OwnerId, Arc<Mutex<Slot>>>>,
    next_round: AtomicU64,
    prune_at: AtomicUsize,
    rng: StdMutex<StdRng>,
}

impl<S: Store + 'static> RoundDriver<S> {
    pub fn new(
        ledger: Arc<Ledger<S>>,
        config: RoundConfig,
        distribution: CrashDistribution,
        retry: RetryPolicy,
        clock: Clock,
        metrics: Arc<Metrics>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            shared: Arc::new(Shared {
                ledger,
                config,
                retry,
                clock,
                metrics,
            }),
            distribution,
            slots: StdMutex::new(HashMap::new()),
            next_round: AtomicU64::new(1),
            prune_at: AtomicUsize::new(PRUNE_THRESHOLD),
            rng: StdMutex::new(rng),
        }
    }

    fn slot(&self, owner: &OwnerId) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !slots.contains_key(owner) && slots.len() >= self.prune_at.load(Ordering::Relaxed) {
            let removed = Self::prune(&mut slots);
            debug!(removed, remaining = slots.len(), "pruned idle round slots");
            self.prune_at
                .store((slots.len() * 2).max(PRUNE_THRESHOLD), Ordering::Relaxed);
        }
        slots.entry(owner.clone()).or_default().clone()
    }

    /// Drop slots nobody else holds whose round is finished and settled. The map
    /// lock is held, so no new handle to a pruned slot can be taken meanwhile.
    fn prune(slots: &mut HashMap<OwnerId, Arc<Mutex<Slot>>>) -> usize {
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(state) => !state.is_idle(),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Forget owners whose last round is finished and settled. Their next view is
    /// idle. Returns the number of slots dropped.
    pub fn prune_idle(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::prune(&mut slots)
    }

    fn existing_slot(&self, owner: &OwnerId) -> Option<Arc<Mutex<Slot>>> {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.get(owner).cloned()
    }

    /// Independent generator for one round, derived from the driver's seed.
    fn round_rng(&self) -> StdRng {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        StdRng::seed_from_u64(rng.gen())
    }

    /// Debit the stake and start a round for `owner`.
    pub async fn start(
        &self,
        owner: &OwnerId,
        intent: &RoundWagerIntent,
    ) -> Result<RoundView, LedgerError> {
        let slot = self.slot(owner);
        let mut guard = slot.lock().await;
        let state = &mut *guard;

        if let Some(previous) = state.round.as_mut() {
            if previous.is_running() {
                return Err(StateError::RoundInProgress(previous.id()).into());
            }
            self.shared.settle(owner, previous).await?;
        }

        let round_id = RoundId(self.next_round.fetch_add(1, Ordering::SeqCst));
        let now = self.shared.clock.now_ms();
        let wager = self
            .shared
            .ledger
            .place_round_wager(owner, intent, round_id, now)
            .await?;
        self.shared.metrics.inc_wager_placed("round");

        let mut rng = self.round_rng();
        let crash_point = self.distribution.sample(&mut rng);
        let mut round = CrashRound::start(
            round_id,
            wager.id,
            wager.stake,
            intent.auto_cash_out,
            crash_point,
            now,
        );
        info!(%owner, round = %round_id, wager = %wager.id, stake = %wager.stake, "round started");

        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        if round.is_running() {
            state.ticker = Some(self.spawn_ticker(owner.clone(), round_id, slot.clone(), rng));
        } else {
            info!(%owner, round = %round_id, crash_point, "round crashed at start");
            // Left owed on failure; retried on the next interaction.
            let _ = self.shared.settle(owner, &mut round).await;
        }
        let view = round.view();
        state.round = Some(round);
        Ok(view)
    }

    /// Cash out the running round at its current multiplier.
    pub async fn cash_out(&self, owner: &OwnerId) -> Result<RoundView, LedgerError> {
        let slot = self
            .existing_slot(owner)
            .ok_or(StateError::RoundNotRunning)?;
        let mut guard = slot.lock().await;
        let state = &mut *guard;
        let round = state.round.as_mut().ok_or(StateError::RoundNotRunning)?;
        if !round.is_running() {
            let _ = self.shared.settle(owner, round).await;
            return Err(StateError::RoundNotRunning.into());
        }

        let multiplier = round.cash_out(self.shared.clock.now_ms())?;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        info!(%owner, round = %round.id(), multiplier, "round cashed out");
        self.shared.settle(owner, round).await?;
        Ok(round.view())
    }

    /// Current round of `owner`, or an idle view.
    pub async fn view(&self, owner: &OwnerId) -> RoundView {
        let Some(slot) = self.existing_slot(owner) else {
            return RoundView::idle();
        };
        let mut guard = slot.lock().await;
        match guard.round.as_mut() {
            Some(round) => {
                let _ = self.shared.settle(owner, round).await;
                round.view()
            }
            None => RoundView::idle(),
        }
    }

    /// Stop every ticker. Running rounds stay running and can still be cashed out.
    pub async fn shutdown(&self) {
        let slots: Vec<_> = {
            let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.values().cloned().collect()
        };
        for slot in slots {
            if let Some(ticker) = slot.lock().await.ticker.take() {
                ticker.abort();
            }
        }
    }

    fn spawn_ticker(
        &self,
        owner: OwnerId,
        round_id: RoundId,
        slot: Arc<Mutex<Slot>>,
        mut rng: StdRng,
    ) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let period = Duration::from_millis(shared.config.tick_ms);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let mut guard = slot.lock().await;
                let state = &mut *guard;
                let Some(round) = state.round.as_mut() else {
                    return;
                };
                if round.id() != round_id || !round.is_running() {
                    return;
                }

                let phase = round.tick(shared.clock.now_ms(), &shared.config, &mut rng);
                debug!(%owner, round = %round_id, multiplier = round.multiplier(), "tick");
                if phase.is_terminal() {
                    info!(
                        %owner,
                        round = %round_id,
                        phase = phase.as_str(),
                        multiplier = round.multiplier(),
                        "round finished"
                    );
                    let _ = shared.settle(&owner, round).await;
                    state.ticker = None;
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakebook_execution::{mocks::FlakyStore, LedgerConfig, MemoryStore, RoundPhase};
    use stakebook_types::{Amount, Identity, WagerStatus};

    const START_MS: u64 = 1_700_000_000_000;

    fn alice() -> OwnerId {
        OwnerId::from("alice")
    }

    async fn driver_with<S: Store + 'static>(
        store: S,
        distribution: CrashDistribution,
    ) -> (Arc<Ledger<S>>, RoundDriver<S>) {
        let ledger = Arc::new(Ledger::new(store, LedgerConfig::default()));
        ledger.open_wallet(&Identity::new("alice", true)).await.unwrap();
        ledger.add_funds(&alice(), 50.0).await.unwrap();
        let driver = RoundDriver::new(
            ledger.clone(),
            RoundConfig::default(),
            distribution,
            RetryPolicy::new(3, Duration::from_millis(200)),
            Clock::starting_at(START_MS),
            Arc::new(Metrics::new()),
            Some(42),
        );
        (ledger, driver)
    }

    fn fixed(crash_point: f64) -> CrashDistribution {
        CrashDistribution::new(vec![stakebook_execution::CrashBucket {
            probability: 1.0,
            low: crash_point,
            high: crash_point,
        }])
        .unwrap()
    }

    fn intent(stake: f64, auto_cash_out: Option<f64>) -> RoundWagerIntent {
        RoundWagerIntent {
            stake,
            auto_cash_out,
        }
    }

    async fn balance<S: Store>(ledger: &Ledger<S>) -> Amount {
        ledger.view(&alice()).await.unwrap().balance
    }

    async fn run_until_terminal<S: Store + 'static>(driver: &RoundDriver<S>) -> RoundView {
        for _ in 0..10_000 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let view = driver.view(&alice()).await;
            if view.phase.is_terminal() {
                return view;
            }
        }
        panic!("round never finished");
    }

    #[tokio::test(start_paused = true)]
    async fn instant_crash_forfeits_without_ticking() {
        let (ledger, driver) = driver_with(MemoryStore::new(), fixed(1.0)).await;
        let view = driver.start(&alice(), &intent(10.0, None)).await.unwrap();
        assert_eq!(view.phase, RoundPhase::Crashed);
        assert_eq!(view.multiplier, 1.0);
        assert_eq!(view.crash_point, Some(1.0));
        assert_eq!(balance(&ledger).await, Amount::units(40));

        let wallet = ledger.view(&alice()).await.unwrap();
        assert_eq!(wallet.wagers[0].status, WagerStatus::Lost);
        assert_eq!(wallet.pending_stake, Amount::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_cash_out_settles_at_target() {
        let (ledger, driver) = driver_with(MemoryStore::new(), fixed(5.0)).await;
        let view = driver.start(&alice(), &intent(20.0, Some(2.0))).await.unwrap();
        assert_eq!(view.phase, RoundPhase::Running);
        assert_eq!(view.crash_point, None);
        assert_eq!(balance(&ledger).await, Amount::units(30));

        let view = run_until_terminal(&driver).await;
        assert_eq!(view.phase, RoundPhase::CashedOut);
        assert!(view.multiplier >= 2.0 && view.multiplier < 2.05, "{}", view.multiplier);
        let balance = balance(&ledger).await;
        assert!(
            balance >= Amount::units(70) && balance < Amount::from_cents(7_100),
            "{balance}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn crash_forfeits_stake() {
        let (ledger, driver) = driver_with(MemoryStore::new(), fixed(1.2)).await;
        driver.start(&alice(), &intent(10.0, None)).await.unwrap();
        let view = run_until_terminal(&driver).await;
        assert_eq!(view.phase, RoundPhase::Crashed);
        assert_eq!(view.multiplier, 1.2);
        assert_eq!(view.payout, Some(Amount::ZERO));
        assert_eq!(balance(&ledger).await, Amount::units(40));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_cash_out_stops_the_round() {
        let (ledger, driver) = driver_with(MemoryStore::new(), fixed(20.0)).await;
        driver.start(&alice(), &intent(10.0, None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_050)).await;

        let view = driver.cash_out(&alice()).await.unwrap();
        assert_eq!(view.phase, RoundPhase::CashedOut);
        let multiplier = view.multiplier;
        assert!(multiplier > 1.0);
        let credited = Amount::units(10).scale(multiplier).unwrap();
        assert_eq!(balance(&ledger).await, Amount::units(40).checked_add(credited).unwrap());

        // No further ticks and no second settlement.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let later = driver.view(&alice()).await;
        assert_eq!(later.multiplier, multiplier);
        assert_eq!(later.trace.len(), view.trace.len());
        assert_eq!(
            driver.cash_out(&alice()).await,
            Err(StateError::RoundNotRunning.into())
        );
        assert_eq!(balance(&ledger).await, Amount::units(40).checked_add(credited).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn one_round_at_a_time() {
        let (ledger, driver) = driver_with(MemoryStore::new(), fixed(20.0)).await;
        let first = driver.start(&alice(), &intent(10.0, None)).await.unwrap();
        let err = driver.start(&alice(), &intent(10.0, None)).await.unwrap_err();
        assert_eq!(
            err,
            StateError::RoundInProgress(first.round_id.unwrap()).into()
        );
        assert_eq!(balance(&ledger).await, Amount::units(40));

        driver.cash_out(&alice()).await.unwrap();
        let second = driver.start(&alice(), &intent(10.0, None)).await.unwrap();
        assert_ne!(second.round_id, first.round_id);
    }

    #[tokio::test(start_paused = true)]
    async fn cash_out_without_round_is_rejected() {
        let (_, driver) = driver_with(MemoryStore::new(), fixed(2.0)).await;
        assert_eq!(
            driver.cash_out(&alice()).await,
            Err(StateError::RoundNotRunning.into())
        );
        assert_eq!(driver.view(&alice()).await.phase, RoundPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_settlement_is_retried_later() {
        let (ledger, driver) = driver_with(FlakyStore::new(MemoryStore::new()), fixed(20.0)).await;
        driver.start(&alice(), &intent(10.0, None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        ledger.store().fail_next_reads(3);
        let err = driver.cash_out(&alice()).await.unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert_eq!(balance(&ledger).await, Amount::units(40));

        // The round stays cashed out and the credit lands on the next read.
        let view = driver.view(&alice()).await;
        assert_eq!(view.phase, RoundPhase::CashedOut);
        let credited = Amount::units(10).scale(view.multiplier).unwrap();
        assert_eq!(balance(&ledger).await, Amount::units(40).checked_add(credited).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn prunes_only_settled_slots() {
        let (ledger, driver) = driver_with(FlakyStore::new(MemoryStore::new()), fixed(20.0)).await;
        let bob = OwnerId::from("bob");
        ledger.open_wallet(&Identity::new("bob", true)).await.unwrap();
        ledger.add_funds(&bob, 50.0).await.unwrap();

        driver.start(&alice(), &intent(10.0, None)).await.unwrap();
        driver.start(&bob, &intent(10.0, None)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Running rounds are never dropped.
        assert_eq!(driver.prune_idle(), 0);

        driver.cash_out(&alice()).await.unwrap();
        ledger.store().fail_next_reads(3);
        assert!(driver.cash_out(&bob).await.is_err());

        // Alice is settled; bob still owes a settlement and keeps his slot.
        assert_eq!(driver.prune_idle(), 1);
        assert_eq!(driver.view(&alice()).await.phase, RoundPhase::Idle);
        let view = driver.view(&bob).await;
        assert_eq!(view.phase, RoundPhase::CashedOut);
        assert_eq!(driver.prune_idle(), 1);

        let credited = Amount::units(10).scale(view.multiplier).unwrap();
        assert_eq!(
            ledger.view(&bob).await.unwrap().balance,
            Amount::units(40).checked_add(credited).unwrap()
        );
    }
}
