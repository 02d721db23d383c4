//! `coursemart-infra` — persistent store implementations.
//!
//! Postgres-backed order and grant stores. The in-memory implementations
//! live next to their ports (`coursemart-orders`, `coursemart-entitlements`);
//! this crate carries the sqlx code and the cross-crate integration tests.

pub mod postgres;

pub use postgres::{ensure_schema, PostgresGrantStore, PostgresOrderStore};

#[cfg(test)]
mod integration_tests;
