//! Collaborator ports consumed by the orchestrator.
//!
//! Catalog and identity are outside this subsystem; checkout only ever asks
//! the catalog for canonical prices (client-supplied prices are never
//! trusted) and asks identity to elevate a guest into an account.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use coursemart_core::{Money, ProductRef, UserId};

#[derive(Debug, Error)]
#[error("catalog unavailable: {0}")]
pub struct CatalogError(pub String);

/// Canonical product data at checkout time, snapshotted onto the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub title: String,
    pub price: Money,
}

/// Product catalog port (courses/papers/e-books CRUD is out of scope).
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// `None` means the reference does not resolve to a purchasable product.
    async fn resolve(
        &self,
        product: &ProductRef,
    ) -> Result<Option<ProductSnapshot>, CatalogError>;
}

#[derive(Debug, Error)]
#[error("identity service error: {0}")]
pub struct IdentityError(pub String);

/// Opaque session token issued after inline account creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

/// Identity service port used for guest-checkout elevation.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn create_user_inline(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserId, IdentityError>;

    async fn issue_session(&self, user_id: UserId) -> Result<SessionToken, IdentityError>;
}

#[async_trait]
impl<T> ProductCatalog for Arc<T>
where
    T: ProductCatalog + ?Sized,
{
    async fn resolve(
        &self,
        product: &ProductRef,
    ) -> Result<Option<ProductSnapshot>, CatalogError> {
        (**self).resolve(product).await
    }
}

#[async_trait]
impl<T> IdentityService for Arc<T>
where
    T: IdentityService + ?Sized,
{
    async fn create_user_inline(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserId, IdentityError> {
        (**self).create_user_inline(email, password).await
    }

    async fn issue_session(&self, user_id: UserId) -> Result<SessionToken, IdentityError> {
        (**self).issue_session(user_id).await
    }
}
