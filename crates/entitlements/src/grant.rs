//! Entitlement grant record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursemart_core::{GrantId, OrderId, ProductRef, UserId};

/// The right to access one purchased product, tied to the order that paid
/// for it. At most one grant exists per `(order, product)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementGrant {
    pub id: GrantId,
    pub order_id: OrderId,
    pub product: ProductRef,
    pub user_id: UserId,
    pub granted_at: DateTime<Utc>,
}

impl EntitlementGrant {
    pub fn new(
        order_id: OrderId,
        product: ProductRef,
        user_id: UserId,
        granted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GrantId::new(),
            order_id,
            product,
            user_id,
            granted_at,
        }
    }
}
