//! Payment gateway port.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use coursemart_core::ChargeId;

use crate::charge::{ChargeRequest, ChargeResponse};
use crate::outcome::GatewayOutcome;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure (network, timeout). The charge may or may not have
    /// been created provider-side; the caller must leave the order pending
    /// and let the reconciliation sweep resolve it.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The provider answered, but not in a shape we understand.
    #[error("gateway protocol error: {0}")]
    Protocol(String),
}

/// Outbound operations against one payment provider covering all three
/// rails. `charge_status` backs the reconciliation poller.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest)
        -> Result<ChargeResponse, GatewayError>;

    async fn charge_status(&self, charge_id: &ChargeId)
        -> Result<GatewayOutcome, GatewayError>;
}

#[async_trait]
impl<T> PaymentGateway for Arc<T>
where
    T: PaymentGateway + ?Sized,
{
    async fn create_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeResponse, GatewayError> {
        (**self).create_charge(request).await
    }

    async fn charge_status(
        &self,
        charge_id: &ChargeId,
    ) -> Result<GatewayOutcome, GatewayError> {
        (**self).charge_status(charge_id).await
    }
}
