//! Environment-driven configuration for the binary.

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use coursemart_reconcile::ReconcileConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// When set, orders and grants persist in Postgres; otherwise the
    /// in-memory stores are used (dev/test).
    pub database_url: Option<String>,
    /// When set, charges go to the HTTP gateway; otherwise the in-process
    /// mock is used (dev/test).
    pub gateway_base_url: Option<String>,
    pub gateway_api_key: String,
    pub webhook_secret_card: Option<String>,
    pub webhook_secret_pix: Option<String>,
    pub webhook_secret_boleto: Option<String>,
    pub reconcile: ReconcileConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, raw, "unparseable env var ignored");
            None
        }
    })
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let mut reconcile = ReconcileConfig::default();
        if let Some(secs) = env_parse::<u64>("RECONCILE_INTERVAL_SECS") {
            reconcile = reconcile.with_interval(Duration::from_secs(secs));
        }
        if let Some(mins) = env_parse::<i64>("CARD_PENDING_AFTER_MINS") {
            reconcile = reconcile.with_card_pending_after(ChronoDuration::minutes(mins));
        }
        if let Some(hours) = env_parse::<i64>("PIX_PENDING_AFTER_HOURS") {
            reconcile = reconcile.with_pix_pending_after(ChronoDuration::hours(hours));
        }
        if let Some(hours) = env_parse::<i64>("BOLETO_PENDING_AFTER_HOURS") {
            reconcile = reconcile.with_boleto_pending_after(ChronoDuration::hours(hours));
        }
        if let Some(limit) = env_parse::<usize>("RECONCILE_BATCH_LIMIT") {
            reconcile = reconcile.with_batch_limit(limit);
        }

        Self {
            bind_addr: std::env::var("BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            gateway_base_url: std::env::var("GATEWAY_BASE_URL").ok(),
            gateway_api_key: std::env::var("GATEWAY_API_KEY").unwrap_or_default(),
            webhook_secret_card: std::env::var("WEBHOOK_SECRET_CARD").ok(),
            webhook_secret_pix: std::env::var("WEBHOOK_SECRET_PIX").ok(),
            webhook_secret_boleto: std::env::var("WEBHOOK_SECRET_BOLETO").ok(),
            reconcile,
        }
    }
}
