//! Orchestrator error surface.
//!
//! Only failures the caller can act on become errors here. Gateway
//! unavailability, duplicate deliveries, and illegal transitions are
//! absorbed into response data and audit entries instead: the order is the
//! durable truth and retry/poll behaviour takes over.

use thiserror::Error;

use coursemart_core::{ChargeId, OrderId};
use coursemart_orders::OrderStoreError;

use crate::ports::CatalogError;

#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Bad request data (unknown product, missing card details, closed
    /// order). Rejected before any persistence.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A webhook or poll referenced a charge no order knows about.
    /// Operator-visible; never surfaced to a buyer.
    #[error("no order matches charge {0}")]
    UnknownCharge(ChargeId),

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] OrderStoreError),
}
