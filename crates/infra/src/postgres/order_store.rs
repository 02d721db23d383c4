//! Postgres-backed order store.
//!
//! `apply_transition` runs read-decide-write inside one transaction with a
//! `SELECT ... FOR UPDATE` row lock on the order, so concurrent deliveries
//! for the same order serialize at the database; different orders proceed in
//! parallel on separate connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use coursemart_core::{
    ChargeId, EventId, Money, OrderId, PayerDetails, PaymentMethod, ProductId, ProductKind,
    ProductRef, UserId,
};
use coursemart_orders::{
    plan_transition, EventDisposition, EventSource, Order, OrderItem, OrderStatus, OrderStore,
    OrderStoreError, PaymentStatus, StaleThresholds, StatusEvent, TransitionDecision,
    TransitionOutcome, TransitionRequest,
};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_error(op: &str, e: sqlx::Error) -> OrderStoreError {
    OrderStoreError::Backend(format!("{op}: {e}"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

fn bad_row(op: &str, detail: impl core::fmt::Display) -> OrderStoreError {
    OrderStoreError::Backend(format!("{op}: corrupt row: {detail}"))
}

fn order_status_from_str(raw: &str) -> Result<OrderStatus, OrderStoreError> {
    match raw {
        "pending" => Ok(OrderStatus::Pending),
        "processing" => Ok(OrderStatus::Processing),
        "completed" => Ok(OrderStatus::Completed),
        "canceled" => Ok(OrderStatus::Canceled),
        other => Err(bad_row("order_status", other)),
    }
}

fn payment_status_from_str(raw: &str) -> Result<PaymentStatus, OrderStoreError> {
    match raw {
        "pending" => Ok(PaymentStatus::Pending),
        "paid" => Ok(PaymentStatus::Paid),
        "declined" => Ok(PaymentStatus::Declined),
        "expired" => Ok(PaymentStatus::Expired),
        "refunded" => Ok(PaymentStatus::Refunded),
        "canceled" => Ok(PaymentStatus::Canceled),
        other => Err(bad_row("payment_status", other)),
    }
}

fn payment_method_from_str(raw: &str) -> Result<PaymentMethod, OrderStoreError> {
    match raw {
        "credit_card" => Ok(PaymentMethod::CreditCard),
        "pix" => Ok(PaymentMethod::Pix),
        "boleto" => Ok(PaymentMethod::Boleto),
        other => Err(bad_row("payment_method", other)),
    }
}

fn source_from_str(raw: &str) -> Result<EventSource, OrderStoreError> {
    match raw {
        "webhook" => Ok(EventSource::Webhook),
        "poll" => Ok(EventSource::Poll),
        "sync_response" => Ok(EventSource::SyncResponse),
        "manual" => Ok(EventSource::Manual),
        other => Err(bad_row("source", other)),
    }
}

fn disposition_as_str(d: EventDisposition) -> &'static str {
    match d {
        EventDisposition::Applied => "applied",
        EventDisposition::Rejected => "rejected",
    }
}

fn disposition_from_str(raw: &str) -> Result<EventDisposition, OrderStoreError> {
    match raw {
        "applied" => Ok(EventDisposition::Applied),
        "rejected" => Ok(EventDisposition::Rejected),
        other => Err(bad_row("disposition", other)),
    }
}

pub(crate) fn product_kind_from_text(raw: &str) -> Option<ProductKind> {
    match raw {
        "course" => Some(ProductKind::Course),
        "paper" => Some(ProductKind::Paper),
        "ebook" => Some(ProductKind::Ebook),
        _ => None,
    }
}

fn product_kind_from_str(raw: &str) -> Result<ProductKind, OrderStoreError> {
    product_kind_from_text(raw).ok_or_else(|| bad_row("product_kind", raw))
}

pub(crate) fn product_kind_as_str(kind: ProductKind) -> &'static str {
    match kind {
        ProductKind::Course => "course",
        ProductKind::Paper => "paper",
        ProductKind::Ebook => "ebook",
    }
}

fn money_to_db(amount: Money) -> Result<i64, OrderStoreError> {
    i64::try_from(amount.minor_units())
        .map_err(|_| OrderStoreError::Backend("amount exceeds BIGINT range".to_string()))
}

fn money_from_db(raw: i64) -> Result<Money, OrderStoreError> {
    u64::try_from(raw)
        .map(Money::from_minor_units)
        .map_err(|_| bad_row("amount", raw))
}

impl PostgresOrderStore {
    fn order_from_row(row: &sqlx::postgres::PgRow, items: Vec<OrderItem>) -> Result<Order, OrderStoreError> {
        let payer: serde_json::Value =
            row.try_get("payer").map_err(|e| bad_row("payer", e))?;
        let payer: PayerDetails =
            serde_json::from_value(payer).map_err(|e| bad_row("payer", e))?;

        let status: String = row.try_get("status").map_err(|e| bad_row("status", e))?;
        let payment_method: String = row
            .try_get("payment_method")
            .map_err(|e| bad_row("payment_method", e))?;
        let payment_status: String = row
            .try_get("payment_status")
            .map_err(|e| bad_row("payment_status", e))?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id").map_err(|e| bad_row("id", e))?),
            user: row
                .try_get::<Option<Uuid>, _>("user_id")
                .map_err(|e| bad_row("user_id", e))?
                .map(UserId::from_uuid),
            payer,
            items,
            total: money_from_db(row.try_get("total").map_err(|e| bad_row("total", e))?)?,
            status: order_status_from_str(&status)?,
            payment_method: payment_method_from_str(&payment_method)?,
            payment_status: payment_status_from_str(&payment_status)?,
            charge_id: row
                .try_get::<Option<String>, _>("charge_id")
                .map_err(|e| bad_row("charge_id", e))?
                .map(ChargeId::new),
            entitlements_granted_at: row
                .try_get("entitlements_granted_at")
                .map_err(|e| bad_row("entitlements_granted_at", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| bad_row("created_at", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| bad_row("updated_at", e))?,
        })
    }

    async fn load_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, OrderStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_kind, product_id, title, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row
                .try_get("product_kind")
                .map_err(|e| bad_row("product_kind", e))?;
            items.push(OrderItem {
                product: ProductRef::new(
                    product_kind_from_str(&kind)?,
                    ProductId::from_uuid(
                        row.try_get("product_id").map_err(|e| bad_row("product_id", e))?,
                    ),
                ),
                title: row.try_get("title").map_err(|e| bad_row("title", e))?,
                unit_price: money_from_db(
                    row.try_get("unit_price").map_err(|e| bad_row("unit_price", e))?,
                )?,
            });
        }
        Ok(items)
    }

    async fn hydrate(
        &self,
        row: Option<sqlx::postgres::PgRow>,
    ) -> Result<Option<Order>, OrderStoreError> {
        match row {
            Some(row) => {
                let id = OrderId::from_uuid(row.try_get("id").map_err(|e| bad_row("id", e))?);
                let items = self.load_items(id).await?;
                Ok(Some(Self::order_from_row(&row, items)?))
            }
            None => Ok(None),
        }
    }
}

/// Latest recorded timestamp for an order's history, inside the current
/// transaction.
async fn last_recorded_at(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
) -> Result<Option<DateTime<Utc>>, OrderStoreError> {
    let row = sqlx::query(
        "SELECT MAX(recorded_at) AS last FROM status_events WHERE order_id = $1",
    )
    .bind(order_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("last_recorded_at", e))?;
    row.try_get("last").map_err(|e| bad_row("last", e))
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: Order) -> Result<(), OrderStoreError> {
        let payer = serde_json::to_value(&order.payer)
            .map_err(|e| OrderStoreError::Backend(format!("encode payer: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, payer, total, status, payment_method,
                payment_status, charge_id, entitlements_granted_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user.map(|u| *u.as_uuid()))
        .bind(payer)
        .bind(money_to_db(order.total)?)
        .bind(order.status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.charge_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(order.entitlements_granted_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            return Err(if is_unique_violation(&e) {
                OrderStoreError::DuplicateOrder
            } else {
                map_sqlx_error("insert_order", e)
            });
        }

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    order_id, position, product_kind, product_id, title, unit_price
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(product_kind_as_str(item.product.kind))
            .bind(item.product.id.as_uuid())
            .bind(&item.title)
            .bind(money_to_db(item.unit_price)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_item", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        self.hydrate(row).await
    }

    async fn find_by_charge(
        &self,
        charge_id: &ChargeId,
    ) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE charge_id = $1")
            .bind(charge_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_charge", e))?;
        self.hydrate(row).await
    }

    #[instrument(skip(self), fields(order_id = %id, charge_id = %charge_id), err)]
    async fn set_charge(&self, id: OrderId, charge_id: ChargeId) -> Result<(), OrderStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let row = sqlx::query("SELECT charge_id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_order", e))?
            .ok_or(OrderStoreError::NotFound)?;

        let existing: Option<String> =
            row.try_get("charge_id").map_err(|e| bad_row("charge_id", e))?;
        match existing {
            Some(existing) if existing == charge_id.as_str() => return Ok(()),
            Some(existing) => {
                return Err(OrderStoreError::ChargeAlreadySet {
                    existing: ChargeId::new(existing),
                })
            }
            None => {}
        }

        sqlx::query("UPDATE orders SET charge_id = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(charge_id.as_str().to_string())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_charge", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn attach_user(&self, id: OrderId, user: UserId) -> Result<(), OrderStoreError> {
        let result = sqlx::query("UPDATE orders SET user_id = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(user.as_uuid())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("attach_user", e))?;

        if result.rows_affected() == 0 {
            return Err(OrderStoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(
        skip(self, request),
        fields(order_id = %id, target = %request.target, source = request.source.as_str()),
        err
    )]
    async fn apply_transition(
        &self,
        id: OrderId,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, OrderStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Row lock: racing deliveries for the same order queue up here.
        let row = sqlx::query("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_order", e))?
            .ok_or(OrderStoreError::NotFound)?;

        let status: String = row.try_get("status").map_err(|e| bad_row("status", e))?;
        let current = order_status_from_str(&status)?;
        let decision = plan_transition(current, request.target);

        let recorded_at = match last_recorded_at(&mut tx, id).await? {
            Some(last) if last > request.occurred_at => last,
            _ => request.occurred_at,
        };

        let disposition = match decision {
            TransitionDecision::Apply => EventDisposition::Applied,
            _ => EventDisposition::Rejected,
        };

        sqlx::query(
            r#"
            INSERT INTO status_events (
                id, order_id, previous, next, payment_status, source,
                disposition, raw_payload, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(EventId::new().as_uuid())
        .bind(id.as_uuid())
        .bind(current.as_str())
        .bind(request.target.as_str())
        .bind(request.payment_status.as_str())
        .bind(request.source.as_str())
        .bind(disposition_as_str(disposition))
        .bind(&request.raw_payload)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_event", e))?;

        if decision == TransitionDecision::Apply {
            sqlx::query(
                "UPDATE orders SET status = $2, payment_status = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(id.as_uuid())
            .bind(request.target.as_str())
            .bind(request.payment_status.as_str())
            .bind(recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_order", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        Ok(match decision {
            TransitionDecision::Apply => TransitionOutcome::Applied {
                previous: current,
                next: request.target,
            },
            TransitionDecision::Duplicate => TransitionOutcome::Duplicate { current },
            TransitionDecision::Illegal => TransitionOutcome::Rejected {
                current,
                attempted: request.target,
            },
        })
    }

    async fn history(&self, id: OrderId) -> Result<Vec<StatusEvent>, OrderStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, previous, next, payment_status, source,
                   disposition, raw_payload, recorded_at
            FROM status_events
            WHERE order_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let previous: String = row.try_get("previous").map_err(|e| bad_row("previous", e))?;
            let next: String = row.try_get("next").map_err(|e| bad_row("next", e))?;
            let payment_status: String = row
                .try_get("payment_status")
                .map_err(|e| bad_row("payment_status", e))?;
            let source: String = row.try_get("source").map_err(|e| bad_row("source", e))?;
            let disposition: String = row
                .try_get("disposition")
                .map_err(|e| bad_row("disposition", e))?;

            events.push(StatusEvent {
                id: EventId::from_uuid(row.try_get("id").map_err(|e| bad_row("id", e))?),
                order_id: OrderId::from_uuid(
                    row.try_get("order_id").map_err(|e| bad_row("order_id", e))?,
                ),
                previous: order_status_from_str(&previous)?,
                next: order_status_from_str(&next)?,
                payment_status: payment_status_from_str(&payment_status)?,
                source: source_from_str(&source)?,
                disposition: disposition_from_str(&disposition)?,
                raw_payload: row
                    .try_get("raw_payload")
                    .map_err(|e| bad_row("raw_payload", e))?,
                recorded_at: row
                    .try_get("recorded_at")
                    .map_err(|e| bad_row("recorded_at", e))?,
            });
        }
        Ok(events)
    }

    async fn find_stale(
        &self,
        now: DateTime<Utc>,
        thresholds: &StaleThresholds,
        limit: usize,
    ) -> Result<Vec<Order>, OrderStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status IN ('pending', 'processing')
              AND (
                    (payment_method = 'credit_card' AND updated_at <= $1)
                 OR (payment_method = 'pix'         AND updated_at <= $2)
                 OR (payment_method = 'boleto'      AND updated_at <= $3)
              )
            ORDER BY updated_at ASC
            LIMIT $4
            "#,
        )
        .bind(now - thresholds.credit_card)
        .bind(now - thresholds.pix)
        .bind(now - thresholds.boleto)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_stale", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let id = OrderId::from_uuid(row.try_get("id").map_err(|e| bad_row("id", e))?);
            let items = self.load_items(id).await?;
            orders.push(Self::order_from_row(&row, items)?);
        }
        Ok(orders)
    }

    async fn mark_entitlements_granted(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<(), OrderStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET entitlements_granted_at = $2
            WHERE id = $1 AND entitlements_granted_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_entitlements_granted", e))?;

        // Zero rows means either already marked (fine) or unknown order.
        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM orders WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("mark_entitlements_granted", e))?;
            if exists.is_none() {
                return Err(OrderStoreError::NotFound);
            }
        }
        Ok(())
    }

    async fn find_completed_ungranted(
        &self,
        limit: usize,
    ) -> Result<Vec<Order>, OrderStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status = 'completed' AND entitlements_granted_at IS NULL
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_completed_ungranted", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let id = OrderId::from_uuid(row.try_get("id").map_err(|e| bad_row("id", e))?);
            let items = self.load_items(id).await?;
            orders.push(Self::order_from_row(&row, items)?);
        }
        Ok(orders)
    }
}
