//! Normalized gateway outcomes.

use serde::{Deserialize, Serialize};

use coursemart_core::ChargeId;

/// The fixed set of internal outcomes every rail's payload is classified
/// into. Downstream code never sees rail-specific status vocabularies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayOutcome {
    Paid,
    Pending,
    Declined,
    Expired,
    Refunded,
    Canceled,
}

impl GatewayOutcome {
    /// Map a provider status string onto an internal outcome. Providers are
    /// inconsistent with each other ("CONFIRMED", "RECEIVED", "paid", ...),
    /// so the synonyms live in one place.
    pub fn from_provider_status(raw: &str) -> Option<GatewayOutcome> {
        match raw.to_ascii_lowercase().as_str() {
            "paid" | "confirmed" | "received" | "settled" => Some(GatewayOutcome::Paid),
            "pending" | "processing" | "in_process" | "awaiting_payment" => {
                Some(GatewayOutcome::Pending)
            }
            "declined" | "refused" | "rejected" => Some(GatewayOutcome::Declined),
            "expired" | "overdue" => Some(GatewayOutcome::Expired),
            "refunded" | "charged_back" => Some(GatewayOutcome::Refunded),
            "canceled" | "cancelled" => Some(GatewayOutcome::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOutcome::Paid => "paid",
            GatewayOutcome::Pending => "pending",
            GatewayOutcome::Declined => "declined",
            GatewayOutcome::Expired => "expired",
            GatewayOutcome::Refunded => "refunded",
            GatewayOutcome::Canceled => "canceled",
        }
    }
}

impl core::fmt::Display for GatewayOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized status delivery, whether it arrived as a webhook or a
/// poll response. `raw` keeps the untouched provider payload for the audit
/// trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayNotification {
    pub charge_id: ChargeId,
    pub outcome: GatewayOutcome,
    pub raw: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_synonyms_collapse() {
        assert_eq!(
            GatewayOutcome::from_provider_status("CONFIRMED"),
            Some(GatewayOutcome::Paid)
        );
        assert_eq!(
            GatewayOutcome::from_provider_status("RECEIVED"),
            Some(GatewayOutcome::Paid)
        );
        assert_eq!(
            GatewayOutcome::from_provider_status("overdue"),
            Some(GatewayOutcome::Expired)
        );
        assert_eq!(GatewayOutcome::from_provider_status("???"), None);
    }
}
