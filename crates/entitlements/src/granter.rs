//! Idempotent entitlement activation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use coursemart_core::{ProductId, ProductKind};
use coursemart_orders::Order;

use crate::grant::EntitlementGrant;
use crate::ports::{EnrollmentService, LibraryService};
use crate::store::{GrantStore, GrantStoreError};

#[derive(Debug, Error)]
pub enum GrantError {
    /// The order has no attached user (guest order whose identity elevation
    /// failed). Nothing can be unlocked until a user is attached; the
    /// reconciliation sweep keeps retrying.
    #[error("order has no attached user")]
    MissingUser,

    #[error("collaborator failed for product {product}: {reason}")]
    Collaborator { product: ProductId, reason: String },

    #[error(transparent)]
    Store(#[from] GrantStoreError),
}

/// What one grant pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrantReport {
    pub granted: usize,
    pub already_granted: usize,
}

/// Granting behaviour behind a trait so the orchestrator stays generic over
/// it (and tests can substitute their own).
#[async_trait]
pub trait Granter: Send + Sync {
    /// Activate access for every item of `order`. Safe to call any number
    /// of times; repeated calls do no redundant work.
    async fn grant_if_needed(&self, order: &Order) -> Result<GrantReport, GrantError>;
}

#[async_trait]
impl<T> Granter for Arc<T>
where
    T: Granter + ?Sized,
{
    async fn grant_if_needed(&self, order: &Order) -> Result<GrantReport, GrantError> {
        (**self).grant_if_needed(order).await
    }
}

/// Default [`Granter`]: grant store + the two product-specific collaborators.
#[derive(Debug)]
pub struct EntitlementGranter<GS, E, L> {
    grants: GS,
    enrollment: E,
    library: L,
}

impl<GS, E, L> EntitlementGranter<GS, E, L> {
    pub fn new(grants: GS, enrollment: E, library: L) -> Self {
        Self {
            grants,
            enrollment,
            library,
        }
    }
}

#[async_trait]
impl<GS, E, L> Granter for EntitlementGranter<GS, E, L>
where
    GS: GrantStore,
    E: EnrollmentService + Send + Sync,
    L: LibraryService + Send + Sync,
{
    async fn grant_if_needed(&self, order: &Order) -> Result<GrantReport, GrantError> {
        let user_id = order.user.ok_or(GrantError::MissingUser)?;
        let mut report = GrantReport::default();

        for item in &order.items {
            let grant =
                EntitlementGrant::new(order.id, item.product, user_id, Utc::now());
            let inserted = self.grants.insert_if_absent(grant).await?;
            if inserted {
                report.granted += 1;
            } else {
                report.already_granted += 1;
            }

            // The collaborator runs even when the grant row already existed:
            // a previous pass may have inserted the row and then failed the
            // side effect, and "ensure" semantics make the repeat harmless.
            let result = match item.product.kind {
                ProductKind::Course => {
                    self.enrollment
                        .ensure_enrolled(user_id, item.product.id)
                        .await
                }
                ProductKind::Paper | ProductKind::Ebook => {
                    self.library
                        .ensure_unlocked(user_id, item.product.id)
                        .await
                }
            };

            if let Err(e) = result {
                warn!(
                    order_id = %order.id,
                    product_id = %item.product.id,
                    "entitlement side effect failed: {e}"
                );
                return Err(GrantError::Collaborator {
                    product: item.product.id,
                    reason: e.to_string(),
                });
            }
        }

        debug!(
            order_id = %order.id,
            granted = report.granted,
            already_granted = report.already_granted,
            "entitlements ensured"
        );
        Ok(report)
    }
}
