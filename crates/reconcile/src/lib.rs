//! `coursemart-reconcile` — background reconciliation sweep.
//!
//! The system's defense against lost or never-sent webhooks: a cooperative
//! background task that re-queries the gateway for orders stuck in a
//! pending state beyond their rail's threshold, feeding results through the
//! same state-machine entry point webhooks use. It also retries entitlement
//! grants that failed after a completed payment.

pub mod config;
pub mod poller;

pub use config::ReconcileConfig;
pub use poller::{run_sweep, PollerHandle, ReconciliationPoller, SweepStats};
