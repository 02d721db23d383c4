//! `coursemart-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the checkout
//! subsystem (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;
pub mod product;

pub use error::{DomainError, DomainResult};
pub use id::{ChargeId, EventId, GrantId, OrderId, ProductId, UserId};
pub use money::Money;
pub use product::{PayerDetails, PaymentMethod, ProductKind, ProductRef};
