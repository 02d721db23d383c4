//! `coursemart-entitlements` — exactly-once activation of purchased access.
//!
//! A paid order unlocks its products at most once, no matter how many times
//! the paid confirmation is delivered. The `(order, product)` uniqueness in
//! the grant store is the idempotency anchor; the enrollment/library
//! collaborators are "ensure" operations that tolerate being called twice.

pub mod grant;
pub mod granter;
pub mod in_memory;
pub mod ports;
pub mod store;

pub use grant::EntitlementGrant;
pub use granter::{EntitlementGranter, GrantError, GrantReport, Granter};
pub use in_memory::{InMemoryEnrollments, InMemoryGrantStore, InMemoryLibrary};
pub use ports::{CollaboratorError, EnrollmentService, LibraryService};
pub use store::{GrantStore, GrantStoreError};
