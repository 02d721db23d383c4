//! `coursemart-gateway` — payment rail adapter.
//!
//! Normalizes the three rails (credit card, PIX, boleto) into one internal
//! event shape. The adapter classifies and forwards; it never mutates order
//! state itself.

pub mod charge;
pub mod client;
pub mod http;
pub mod mock;
pub mod outcome;
pub mod webhook;

pub use charge::{CardDetails, CardOutcome, ChargeRequest, ChargeResponse};
pub use client::{GatewayError, PaymentGateway};
pub use http::HttpGateway;
pub use mock::MockGateway;
pub use outcome::{GatewayNotification, GatewayOutcome};
pub use webhook::{WebhookAdapter, WebhookError, WebhookVerifier};
