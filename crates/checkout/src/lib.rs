//! `coursemart-checkout` — the checkout orchestrator.
//!
//! Accepts a checkout request, persists the order before any money moves,
//! drives the charge through the gateway, and applies every later
//! confirmation (webhook or poll) through one state-machine entry point.

pub mod error;
pub mod in_memory;
pub mod ports;
pub mod service;

pub use error::CheckoutError;
pub use in_memory::{InMemoryCatalog, InMemoryIdentity};
pub use ports::{
    CatalogError, IdentityError, IdentityService, ProductCatalog, ProductSnapshot, SessionToken,
};
pub use service::{
    CheckoutOutcome, CheckoutRequest, CheckoutService, Customer, IdentityOutcome,
    NotificationDisposition, PaymentInstructions, ReconcileAction, StatusView,
};
