//! Postgres persistence.
//!
//! Runtime `sqlx::query` throughout — no compile-time checking against a
//! live database. Concurrency control sits in the database: `apply_transition`
//! takes a row lock on the order, and the grant table's unique constraint is
//! the exactly-once anchor.

pub mod grant_store;
pub mod order_store;

pub use grant_store::PostgresGrantStore;
pub use order_store::PostgresOrderStore;

use sqlx::PgPool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        user_id UUID NULL,
        payer JSONB NOT NULL,
        total BIGINT NOT NULL,
        status TEXT NOT NULL,
        payment_method TEXT NOT NULL,
        payment_status TEXT NOT NULL,
        charge_id TEXT NULL UNIQUE,
        entitlements_granted_at TIMESTAMPTZ NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_items (
        order_id UUID NOT NULL REFERENCES orders(id),
        position INT NOT NULL,
        product_kind TEXT NOT NULL,
        product_id UUID NOT NULL,
        title TEXT NOT NULL,
        unit_price BIGINT NOT NULL,
        PRIMARY KEY (order_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS status_events (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders(id),
        previous TEXT NOT NULL,
        next TEXT NOT NULL,
        payment_status TEXT NOT NULL,
        source TEXT NOT NULL,
        disposition TEXT NOT NULL,
        raw_payload JSONB NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS status_events_order_idx
        ON status_events (order_id, recorded_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS orders_stale_idx
        ON orders (status, payment_method, updated_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entitlement_grants (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL,
        product_kind TEXT NOT NULL,
        product_id UUID NOT NULL,
        user_id UUID NOT NULL,
        granted_at TIMESTAMPTZ NOT NULL,
        UNIQUE (order_id, product_id)
    )
    "#,
];

/// Create the tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
