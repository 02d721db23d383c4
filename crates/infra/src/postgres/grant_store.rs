//! Postgres-backed grant store.
//!
//! The `(order_id, product_id)` unique constraint is the exactly-once
//! anchor: `insert_if_absent` is a single `ON CONFLICT DO NOTHING` insert,
//! so N concurrent grant passes agree on one winner without any lock.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use coursemart_core::{GrantId, OrderId, ProductId, ProductRef, UserId};
use coursemart_entitlements::{EntitlementGrant, GrantStore, GrantStoreError};

use super::order_store::{product_kind_as_str, product_kind_from_text};

#[derive(Debug, Clone)]
pub struct PostgresGrantStore {
    pool: PgPool,
}

impl PostgresGrantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(op: &str, e: sqlx::Error) -> GrantStoreError {
    GrantStoreError::Backend(format!("{op}: {e}"))
}

fn bad_row(detail: impl core::fmt::Display) -> GrantStoreError {
    GrantStoreError::Backend(format!("corrupt row: {detail}"))
}

#[async_trait]
impl GrantStore for PostgresGrantStore {
    async fn insert_if_absent(&self, grant: EntitlementGrant) -> Result<bool, GrantStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO entitlement_grants (
                id, order_id, product_kind, product_id, user_id, granted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id, product_id) DO NOTHING
            "#,
        )
        .bind(grant.id.as_uuid())
        .bind(grant.order_id.as_uuid())
        .bind(product_kind_as_str(grant.product.kind))
        .bind(grant.product.id.as_uuid())
        .bind(grant.user_id.as_uuid())
        .bind(grant.granted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_if_absent", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn grants_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<EntitlementGrant>, GrantStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_kind, product_id, user_id, granted_at
            FROM entitlement_grants
            WHERE order_id = $1
            ORDER BY granted_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("grants_for_order", e))?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("product_kind").map_err(bad_row)?;
            grants.push(EntitlementGrant {
                id: GrantId::from_uuid(row.try_get("id").map_err(bad_row)?),
                order_id: OrderId::from_uuid(row.try_get("order_id").map_err(bad_row)?),
                product: ProductRef::new(
                    product_kind_from_text(&kind).ok_or_else(|| bad_row(&kind))?,
                    ProductId::from_uuid(row.try_get("product_id").map_err(bad_row)?),
                ),
                user_id: UserId::from_uuid(row.try_get("user_id").map_err(bad_row)?),
                granted_at: row.try_get("granted_at").map_err(bad_row)?,
            });
        }
        Ok(grants)
    }
}
