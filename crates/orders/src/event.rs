//! Append-only status history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursemart_core::{EventId, OrderId};

use crate::status::{OrderStatus, PaymentStatus};

/// Where a status delivery came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Webhook,
    Poll,
    SyncResponse,
    Manual,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Webhook => "webhook",
            EventSource::Poll => "poll",
            EventSource::SyncResponse => "sync_response",
            EventSource::Manual => "manual",
        }
    }
}

/// Whether the delivery changed the order or was recorded as an audit-only
/// rejection (duplicate or illegal edge).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDisposition {
    Applied,
    Rejected,
}

/// One entry in an order's status history.
///
/// History is append-only and monotonically ordered by `recorded_at`; the
/// subsequence with `disposition == Applied` forms a legal path through the
/// transition table. Rejected entries keep the evidence (raw gateway
/// payload) without moving the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: EventId,
    pub order_id: OrderId,
    pub previous: OrderStatus,
    /// The target of the delivery. For rejected entries this is the status
    /// the event *attempted* to reach; the order stayed at `previous`.
    pub next: OrderStatus,
    pub payment_status: PaymentStatus,
    pub source: EventSource,
    pub disposition: EventDisposition,
    /// Raw gateway payload, stored opaque for forensic audit.
    pub raw_payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
