//! Reconciliation configuration.

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use coursemart_orders::StaleThresholds;

/// Sweep cadence and per-rail staleness thresholds.
///
/// The thresholds track how long each rail legitimately takes: a card
/// confirmation should land within minutes, PIX within hours, boleto
/// settlement within days. Values are configuration, not constants — the
/// binary reads overrides from the environment.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    pub card_pending_after: ChronoDuration,
    pub pix_pending_after: ChronoDuration,
    pub boleto_pending_after: ChronoDuration,
    /// Maximum orders re-queried per sweep.
    pub batch_limit: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            card_pending_after: ChronoDuration::minutes(15),
            pix_pending_after: ChronoDuration::hours(2),
            boleto_pending_after: ChronoDuration::hours(48),
            batch_limit: 50,
        }
    }
}

impl ReconcileConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_card_pending_after(mut self, after: ChronoDuration) -> Self {
        self.card_pending_after = after;
        self
    }

    pub fn with_pix_pending_after(mut self, after: ChronoDuration) -> Self {
        self.pix_pending_after = after;
        self
    }

    pub fn with_boleto_pending_after(mut self, after: ChronoDuration) -> Self {
        self.boleto_pending_after = after;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn thresholds(&self) -> StaleThresholds {
        StaleThresholds {
            credit_card: self.card_pending_after,
            pix: self.pix_pending_after,
            boleto: self.boleto_pending_after,
        }
    }
}
