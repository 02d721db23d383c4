//! `coursemart-orders` — durable order record and status state machine.
//!
//! Orders are created once, mutated only through store-mediated status
//! transitions, and never deleted. Every transition attempt (applied or
//! rejected) leaves an append-only [`StatusEvent`] behind for audit.

pub mod event;
pub mod in_memory;
pub mod order;
pub mod status;
pub mod store;

pub use event::{EventDisposition, EventSource, StatusEvent};
pub use in_memory::InMemoryOrderStore;
pub use order::{Order, OrderItem};
pub use status::{plan_transition, transition_allowed, OrderStatus, PaymentStatus, TransitionDecision};
pub use store::{OrderStore, OrderStoreError, StaleThresholds, TransitionOutcome, TransitionRequest};
