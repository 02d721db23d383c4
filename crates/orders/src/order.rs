//! Order and order-item records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursemart_core::{
    ChargeId, DomainError, DomainResult, Money, OrderId, PayerDetails, PaymentMethod, ProductRef,
    UserId,
};

use crate::status::{OrderStatus, PaymentStatus};

/// One purchased line: product reference plus title and price snapshotted at
/// checkout time, immune to later catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product: ProductRef,
    pub title: String,
    pub unit_price: Money,
}

/// Durable order record.
///
/// Created once via [`Order::create`]; afterwards only the store mutates it,
/// and only through status transitions (plus charge/user attachment during
/// checkout). `total` always equals the sum of item prices at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Owning user; `None` for a guest checkout until identity elevation
    /// attaches an account.
    pub user: Option<UserId>,
    pub payer: PayerDetails,
    pub items: Vec<OrderItem>,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Opaque gateway charge reference. At most one charge is ever issued
    /// per order; the store refuses a second id.
    pub charge_id: Option<ChargeId>,
    /// Set once every entitlement for this order has been granted; orders
    /// completed without it are picked up by the reconciliation sweep.
    pub entitlements_granted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validated constructor. Computes the total from the item snapshots and
    /// starts the lifecycle at `Pending`/`Pending`.
    pub fn create(
        id: OrderId,
        user: Option<UserId>,
        payer: PayerDetails,
        items: Vec<OrderItem>,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> DomainResult<Order> {
        if items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        if let Some(item) = items.iter().find(|i| i.unit_price.is_zero()) {
            return Err(DomainError::validation(format!(
                "item '{}' has no price to charge",
                item.title
            )));
        }

        let total = Money::checked_sum(items.iter().map(|i| i.unit_price))?;

        Ok(Order {
            id,
            user,
            payer,
            items,
            total,
            status: OrderStatus::Pending,
            payment_method,
            payment_status: PaymentStatus::Pending,
            charge_id: None,
            entitlements_granted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a charge may still be issued for this order.
    pub fn awaiting_charge(&self) -> bool {
        self.status == OrderStatus::Pending && self.charge_id.is_none()
    }
}
