//! Collaborator ports for the product-specific side effects.
//!
//! Enrollment and library live outside this subsystem. Both are specified
//! as idempotent "ensure granted" operations, never "create", so the
//! granter may safely call them again after a partial failure.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use coursemart_core::{ProductId, UserId};

#[derive(Debug, Error)]
#[error("collaborator unavailable: {0}")]
pub struct CollaboratorError(pub String);

/// Course enrollment service (out of scope, consumed through this port).
#[async_trait]
pub trait EnrollmentService: Send + Sync {
    async fn ensure_enrolled(
        &self,
        user_id: UserId,
        course_id: ProductId,
    ) -> Result<(), CollaboratorError>;
}

/// Paper/e-book library service (out of scope, consumed through this port).
#[async_trait]
pub trait LibraryService: Send + Sync {
    async fn ensure_unlocked(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
impl<T> EnrollmentService for Arc<T>
where
    T: EnrollmentService + ?Sized,
{
    async fn ensure_enrolled(
        &self,
        user_id: UserId,
        course_id: ProductId,
    ) -> Result<(), CollaboratorError> {
        (**self).ensure_enrolled(user_id, course_id).await
    }
}

#[async_trait]
impl<T> LibraryService for Arc<T>
where
    T: LibraryService + ?Sized,
{
    async fn ensure_unlocked(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<(), CollaboratorError> {
        (**self).ensure_unlocked(user_id, product_id).await
    }
}
