//! Order store port.
//!
//! The store is the only writer of order state. `apply_transition` is the
//! heart of it: one atomic read-decide-write per order, so concurrent
//! deliveries (webhook racing the poller, duplicate webhooks) serialize and
//! the loser is recorded as a rejected audit entry instead of double-applying.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use coursemart_core::{ChargeId, OrderId, PaymentMethod, UserId};

use crate::event::{EventSource, StatusEvent};
use crate::order::Order;
use crate::status::{OrderStatus, PaymentStatus};

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("order not found")]
    NotFound,

    #[error("order already exists")]
    DuplicateOrder,

    /// A charge id is already recorded for the order; issuing a second
    /// charge is never allowed.
    #[error("charge already recorded: {existing}")]
    ChargeAlreadySet { existing: ChargeId },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// One delivery to run through the state machine.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub target: OrderStatus,
    pub payment_status: PaymentStatus,
    pub source: EventSource,
    /// Raw gateway payload retained on the audit entry.
    pub raw_payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Result of one atomic transition attempt. All variants leave an audit
/// entry behind; only `Applied` changes the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        previous: OrderStatus,
        next: OrderStatus,
    },
    /// Target equals current status (re-delivered confirmation).
    Duplicate { current: OrderStatus },
    /// Edge not in the table (e.g. anything after a terminal status).
    Rejected {
        current: OrderStatus,
        attempted: OrderStatus,
    },
}

impl TransitionOutcome {
    /// True exactly when this call moved the order into `Completed` — the
    /// one-and-only trigger for entitlement granting.
    pub fn completed_now(&self) -> bool {
        matches!(
            self,
            TransitionOutcome::Applied {
                next: OrderStatus::Completed,
                ..
            }
        )
    }
}

/// Per-rail age thresholds for the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct StaleThresholds {
    pub credit_card: Duration,
    pub pix: Duration,
    pub boleto: Duration,
}

impl StaleThresholds {
    pub fn for_method(&self, method: PaymentMethod) -> Duration {
        match method {
            PaymentMethod::CreditCard => self.credit_card,
            PaymentMethod::Pix => self.pix,
            PaymentMethod::Boleto => self.boleto,
        }
    }
}

/// Durable order storage.
///
/// Implementations must serialize `apply_transition` per order id (mutex,
/// row lock) and keep each order's history append-only with monotonically
/// non-decreasing `recorded_at`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<(), OrderStoreError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError>;

    async fn find_by_charge(&self, charge_id: &ChargeId)
        -> Result<Option<Order>, OrderStoreError>;

    /// Record the gateway's charge reference. Recording the same id twice is
    /// a no-op; a different id is refused with `ChargeAlreadySet`.
    async fn set_charge(&self, id: OrderId, charge_id: ChargeId) -> Result<(), OrderStoreError>;

    /// Attach the owning user to a guest order (identity elevation).
    async fn attach_user(&self, id: OrderId, user: UserId) -> Result<(), OrderStoreError>;

    /// Atomically evaluate and record one delivery. Never fails on duplicate
    /// or illegal edges — those are audit entries, reported in the outcome.
    async fn apply_transition(
        &self,
        id: OrderId,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, OrderStoreError>;

    async fn history(&self, id: OrderId) -> Result<Vec<StatusEvent>, OrderStoreError>;

    /// Non-terminal orders whose last update is older than their rail's
    /// threshold — candidates for the reconciliation sweep.
    async fn find_stale(
        &self,
        now: DateTime<Utc>,
        thresholds: &StaleThresholds,
        limit: usize,
    ) -> Result<Vec<Order>, OrderStoreError>;

    /// Record that every entitlement for the order has been granted. Keeps
    /// the first timestamp on repeat calls.
    async fn mark_entitlements_granted(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<(), OrderStoreError>;

    /// Completed orders still missing their entitlement bookkeeping —
    /// candidates for the compensating grant sweep.
    async fn find_completed_ungranted(&self, limit: usize)
        -> Result<Vec<Order>, OrderStoreError>;
}

#[async_trait]
impl<T> OrderStore for Arc<T>
where
    T: OrderStore + ?Sized,
{
    async fn insert(&self, order: Order) -> Result<(), OrderStoreError> {
        (**self).insert(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        (**self).get(id).await
    }

    async fn find_by_charge(
        &self,
        charge_id: &ChargeId,
    ) -> Result<Option<Order>, OrderStoreError> {
        (**self).find_by_charge(charge_id).await
    }

    async fn set_charge(&self, id: OrderId, charge_id: ChargeId) -> Result<(), OrderStoreError> {
        (**self).set_charge(id, charge_id).await
    }

    async fn attach_user(&self, id: OrderId, user: UserId) -> Result<(), OrderStoreError> {
        (**self).attach_user(id, user).await
    }

    async fn apply_transition(
        &self,
        id: OrderId,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, OrderStoreError> {
        (**self).apply_transition(id, request).await
    }

    async fn history(&self, id: OrderId) -> Result<Vec<StatusEvent>, OrderStoreError> {
        (**self).history(id).await
    }

    async fn find_stale(
        &self,
        now: DateTime<Utc>,
        thresholds: &StaleThresholds,
        limit: usize,
    ) -> Result<Vec<Order>, OrderStoreError> {
        (**self).find_stale(now, thresholds, limit).await
    }

    async fn mark_entitlements_granted(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<(), OrderStoreError> {
        (**self).mark_entitlements_granted(id, at).await
    }

    async fn find_completed_ungranted(
        &self,
        limit: usize,
    ) -> Result<Vec<Order>, OrderStoreError> {
        (**self).find_completed_ungranted(limit).await
    }
}
