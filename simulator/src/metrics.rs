use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: String,
}

/// Prometheus counters for the backend.
pub struct Metrics {
    registry: Registry,
    wagers_placed: Family<KindLabels, Counter>,
    settlements: Family<OutcomeLabels, Counter>,
    rounds: Family<OutcomeLabels, Counter>,
    rejected_intents: Family<KindLabels, Counter>,
    sweeper_passes: Counter,
    sweeper_retries: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("stakebook");
        let wagers_placed = Family::<KindLabels, Counter>::default();
        let settlements = Family::<OutcomeLabels, Counter>::default();
        let rounds = Family::<OutcomeLabels, Counter>::default();
        let rejected_intents = Family::<KindLabels, Counter>::default();
        let sweeper_passes = Counter::default();
        let sweeper_retries = Counter::default();

        registry.register(
            "wagers_placed",
            "Wagers placed, by kind.",
            wagers_placed.clone(),
        );
        registry.register(
            "settlements",
            "Wagers moved to a terminal status, by outcome.",
            settlements.clone(),
        );
        registry.register(
            "rounds",
            "Crash rounds finished, by terminal phase.",
            rounds.clone(),
        );
        registry.register(
            "rejected_intents",
            "Intents rejected, by error kind.",
            rejected_intents.clone(),
        );
        registry.register(
            "sweeper_passes",
            "Settlement sweeper passes.",
            sweeper_passes.clone(),
        );
        registry.register(
            "sweeper_retries",
            "Settlement attempts retried after an infrastructure error.",
            sweeper_retries.clone(),
        );

        Self {
            registry,
            wagers_placed,
            settlements,
            rounds,
            rejected_intents,
            sweeper_passes,
            sweeper_retries,
        }
    }

    pub fn inc_wager_placed(&self, kind: &str) {
        self.wagers_placed
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn inc_settlement(&self, outcome: &str) {
        self.settlements
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn inc_round(&self, phase: &str) {
        self.rounds
            .get_or_create(&OutcomeLabels {
                outcome: phase.to_string(),
            })
            .inc();
    }

    pub fn inc_rejected(&self, kind: &str) {
        self.rejected_intents
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn inc_sweeper_pass(&self) {
        self.sweeper_passes.inc();
    }

    pub fn inc_sweeper_retry(&self) {
        self.sweeper_retries.inc();
    }

    /// Render in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Err(err) = encode(&mut out, &self.registry) {
            tracing::warn!(?err, "failed to encode metrics");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_labelled_counters() {
        let metrics = Metrics::new();
        metrics.inc_wager_placed("event");
        metrics.inc_wager_placed("event");
        metrics.inc_rejected("validation");
        metrics.inc_sweeper_pass();

        let out = metrics.render();
        assert!(out.contains("stakebook_wagers_placed_total{kind=\"event\"} 2"), "{out}");
        assert!(out.contains("stakebook_rejected_intents_total{kind=\"validation\"} 1"), "{out}");
        assert!(out.contains("stakebook_sweeper_passes_total 1"), "{out}");
    }
}
