//! Grant store port.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use coursemart_core::OrderId;

use crate::grant::EntitlementGrant;

#[derive(Debug, Error)]
pub enum GrantStoreError {
    #[error("grant store backend error: {0}")]
    Backend(String),
}

/// Durable grant storage. `insert_if_absent` is the idempotency anchor:
/// implementations must make the `(order, product)` uniqueness check and the
/// insert one atomic step (map entry in memory, unique constraint in SQL).
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Returns `true` when the grant was inserted, `false` when one already
    /// existed for the same `(order, product)` pair.
    async fn insert_if_absent(&self, grant: EntitlementGrant) -> Result<bool, GrantStoreError>;

    async fn grants_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<EntitlementGrant>, GrantStoreError>;
}

#[async_trait]
impl<T> GrantStore for Arc<T>
where
    T: GrantStore + ?Sized,
{
    async fn insert_if_absent(&self, grant: EntitlementGrant) -> Result<bool, GrantStoreError> {
        (**self).insert_if_absent(grant).await
    }

    async fn grants_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<EntitlementGrant>, GrantStoreError> {
        (**self).grants_for_order(order_id).await
    }
}
