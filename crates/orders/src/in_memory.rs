//! In-memory order store.
//!
//! Intended for tests/dev. Transitions are serialized with a mutex per
//! order; the outer map lock is only held long enough to find the entry, so
//! different orders proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use coursemart_core::{ChargeId, EventId, OrderId, UserId};

use crate::event::{EventDisposition, StatusEvent};
use crate::order::Order;
use crate::status::{plan_transition, OrderStatus, TransitionDecision};
use crate::store::{
    OrderStore, OrderStoreError, StaleThresholds, TransitionOutcome, TransitionRequest,
};

#[derive(Debug)]
struct OrderEntry {
    order: Order,
    history: Vec<StatusEvent>,
}

/// In-memory [`OrderStore`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Arc<Mutex<OrderEntry>>>>,
    by_charge: RwLock<HashMap<ChargeId, OrderId>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: OrderId) -> Result<Arc<Mutex<OrderEntry>>, OrderStoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
        orders.get(&id).cloned().ok_or(OrderStoreError::NotFound)
    }

    /// History timestamps never go backwards, even if the caller's clock does.
    fn clamp_recorded_at(history: &[StatusEvent], at: DateTime<Utc>) -> DateTime<Utc> {
        match history.last() {
            Some(last) if last.recorded_at > at => last.recorded_at,
            _ => at,
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), OrderStoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
        if orders.contains_key(&order.id) {
            return Err(OrderStoreError::DuplicateOrder);
        }
        orders.insert(
            order.id,
            Arc::new(Mutex::new(OrderEntry {
                order,
                history: Vec::new(),
            })),
        );
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        match self.entry(id) {
            Ok(entry) => {
                let entry = entry
                    .lock()
                    .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
                Ok(Some(entry.order.clone()))
            }
            Err(OrderStoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_by_charge(
        &self,
        charge_id: &ChargeId,
    ) -> Result<Option<Order>, OrderStoreError> {
        let id = {
            let by_charge = self
                .by_charge
                .read()
                .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
            by_charge.get(charge_id).copied()
        };
        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn set_charge(&self, id: OrderId, charge_id: ChargeId) -> Result<(), OrderStoreError> {
        let entry = self.entry(id)?;
        let mut entry = entry
            .lock()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;

        match &entry.order.charge_id {
            Some(existing) if *existing == charge_id => return Ok(()),
            Some(existing) => {
                return Err(OrderStoreError::ChargeAlreadySet {
                    existing: existing.clone(),
                })
            }
            None => {}
        }

        entry.order.charge_id = Some(charge_id.clone());
        entry.order.updated_at = Utc::now();

        let mut by_charge = self
            .by_charge
            .write()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
        by_charge.insert(charge_id, id);
        Ok(())
    }

    async fn attach_user(&self, id: OrderId, user: UserId) -> Result<(), OrderStoreError> {
        let entry = self.entry(id)?;
        let mut entry = entry
            .lock()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
        entry.order.user = Some(user);
        entry.order.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_transition(
        &self,
        id: OrderId,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, OrderStoreError> {
        let entry = self.entry(id)?;
        let mut entry = entry
            .lock()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;

        let current = entry.order.status;
        let decision = plan_transition(current, request.target);
        let recorded_at = Self::clamp_recorded_at(&entry.history, request.occurred_at);

        let disposition = match decision {
            TransitionDecision::Apply => EventDisposition::Applied,
            _ => EventDisposition::Rejected,
        };

        entry.history.push(StatusEvent {
            id: EventId::new(),
            order_id: id,
            previous: current,
            next: request.target,
            payment_status: request.payment_status,
            source: request.source,
            disposition,
            raw_payload: request.raw_payload,
            recorded_at,
        });

        match decision {
            TransitionDecision::Apply => {
                entry.order.status = request.target;
                entry.order.payment_status = request.payment_status;
                entry.order.updated_at = recorded_at;
                Ok(TransitionOutcome::Applied {
                    previous: current,
                    next: request.target,
                })
            }
            TransitionDecision::Duplicate => Ok(TransitionOutcome::Duplicate { current }),
            TransitionDecision::Illegal => Ok(TransitionOutcome::Rejected {
                current,
                attempted: request.target,
            }),
        }
    }

    async fn history(&self, id: OrderId) -> Result<Vec<StatusEvent>, OrderStoreError> {
        let entry = self.entry(id)?;
        let entry = entry
            .lock()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
        Ok(entry.history.clone())
    }

    async fn find_stale(
        &self,
        now: DateTime<Utc>,
        thresholds: &StaleThresholds,
        limit: usize,
    ) -> Result<Vec<Order>, OrderStoreError> {
        let entries: Vec<Arc<Mutex<OrderEntry>>> = {
            let orders = self
                .orders
                .read()
                .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
            orders.values().cloned().collect()
        };

        let mut stale = Vec::new();
        for entry in entries {
            let entry = entry
                .lock()
                .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
            let order = &entry.order;
            if order.status.is_terminal() {
                continue;
            }
            let cutoff = now - thresholds.for_method(order.payment_method);
            if order.updated_at <= cutoff {
                stale.push(order.clone());
            }
        }

        // Oldest first so the longest-stuck orders win the batch.
        stale.sort_by_key(|o| o.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn mark_entitlements_granted(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<(), OrderStoreError> {
        let entry = self.entry(id)?;
        let mut entry = entry
            .lock()
            .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
        if entry.order.entitlements_granted_at.is_none() {
            entry.order.entitlements_granted_at = Some(at);
        }
        Ok(())
    }

    async fn find_completed_ungranted(
        &self,
        limit: usize,
    ) -> Result<Vec<Order>, OrderStoreError> {
        let entries: Vec<Arc<Mutex<OrderEntry>>> = {
            let orders = self
                .orders
                .read()
                .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
            orders.values().cloned().collect()
        };

        let mut ungranted = Vec::new();
        for entry in entries {
            let entry = entry
                .lock()
                .map_err(|_| OrderStoreError::Backend("lock poisoned".to_string()))?;
            let order = &entry.order;
            if order.status == OrderStatus::Completed && order.entitlements_granted_at.is_none() {
                ungranted.push(order.clone());
            }
        }

        ungranted.sort_by_key(|o| o.updated_at);
        ungranted.truncate(limit);
        Ok(ungranted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSource;
    use crate::order::OrderItem;
    use crate::status::PaymentStatus;
    use chrono::Duration;
    use coursemart_core::{Money, PayerDetails, PaymentMethod, ProductId, ProductKind, ProductRef};

    fn test_order(method: PaymentMethod) -> Order {
        Order::create(
            OrderId::new(),
            Some(UserId::new()),
            PayerDetails {
                name: "Ana Souza".to_string(),
                email: "ana@example.com".to_string(),
                tax_document: None,
            },
            vec![OrderItem {
                product: ProductRef::new(ProductKind::Course, ProductId::new()),
                title: "Rust course".to_string(),
                unit_price: Money::from_minor_units(19900),
            }],
            method,
            Utc::now(),
        )
        .unwrap()
    }

    fn paid_request() -> TransitionRequest {
        TransitionRequest {
            target: OrderStatus::Completed,
            payment_status: PaymentStatus::Paid,
            source: EventSource::Webhook,
            raw_payload: serde_json::json!({"status": "paid"}),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Pix);
        let id = order.id;
        store.insert(order.clone()).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap(), order);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_id() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Pix);
        store.insert(order.clone()).await.unwrap();
        assert!(matches!(
            store.insert(order).await.unwrap_err(),
            OrderStoreError::DuplicateOrder
        ));
    }

    #[tokio::test]
    async fn set_charge_is_idempotent_but_refuses_a_second_id() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Boleto);
        let id = order.id;
        store.insert(order).await.unwrap();

        store.set_charge(id, ChargeId::new("ch_1")).await.unwrap();
        store.set_charge(id, ChargeId::new("ch_1")).await.unwrap();
        let err = store.set_charge(id, ChargeId::new("ch_2")).await.unwrap_err();
        assert!(matches!(err, OrderStoreError::ChargeAlreadySet { .. }));

        let found = store.find_by_charge(&ChargeId::new("ch_1")).await.unwrap();
        assert_eq!(found.unwrap().id, id);
    }

    #[tokio::test]
    async fn applied_transition_updates_order_and_history() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Pix);
        let id = order.id;
        store.insert(order).await.unwrap();

        let outcome = store.apply_transition(id, paid_request()).await.unwrap();
        assert!(outcome.completed_now());

        let order = store.get(id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.payment_status, PaymentStatus::Paid);

        let history = store.history(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].disposition, EventDisposition::Applied);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_recorded_not_applied() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Boleto);
        let id = order.id;
        store.insert(order).await.unwrap();

        let first = store.apply_transition(id, paid_request()).await.unwrap();
        let second = store.apply_transition(id, paid_request()).await.unwrap();

        assert!(first.completed_now());
        assert_eq!(
            second,
            TransitionOutcome::Duplicate {
                current: OrderStatus::Completed
            }
        );

        let history = store.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].disposition, EventDisposition::Applied);
        assert_eq!(history[1].disposition, EventDisposition::Rejected);
    }

    #[tokio::test]
    async fn stray_pending_after_completed_is_rejected() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Pix);
        let id = order.id;
        store.insert(order).await.unwrap();
        store.apply_transition(id, paid_request()).await.unwrap();

        let stray = TransitionRequest {
            target: OrderStatus::Processing,
            payment_status: PaymentStatus::Pending,
            source: EventSource::Webhook,
            raw_payload: serde_json::json!({"status": "pending"}),
            occurred_at: Utc::now(),
        };
        let outcome = store.apply_transition(id, stray).await.unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Rejected {
                current: OrderStatus::Completed,
                attempted: OrderStatus::Processing,
            }
        );
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            OrderStatus::Completed
        );
    }

    #[tokio::test]
    async fn racing_deliveries_apply_exactly_once() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = test_order(PaymentMethod::Boleto);
        let id = order.id;
        store.insert(order).await.unwrap();

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.apply_transition(id, paid_request()).await.unwrap() }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.apply_transition(id, paid_request()).await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let applied = [&a, &b].iter().filter(|o| o.completed_now()).count();
        assert_eq!(applied, 1, "exactly one delivery may win");

        let history = store.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history
                .iter()
                .filter(|e| e.disposition == EventDisposition::Applied)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn history_timestamps_never_regress() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Pix);
        let id = order.id;
        store.insert(order).await.unwrap();

        let now = Utc::now();
        let mut early = paid_request();
        early.target = OrderStatus::Processing;
        early.payment_status = PaymentStatus::Pending;
        early.occurred_at = now;
        store.apply_transition(id, early).await.unwrap();

        // Second delivery claims an older clock; the store clamps it.
        let mut late = paid_request();
        late.occurred_at = now - Duration::seconds(30);
        store.apply_transition(id, late).await.unwrap();

        let history = store.history(id).await.unwrap();
        assert!(history[0].recorded_at <= history[1].recorded_at);
    }

    #[tokio::test]
    async fn find_stale_respects_per_rail_thresholds() {
        let store = InMemoryOrderStore::new();
        let thresholds = StaleThresholds {
            credit_card: Duration::minutes(15),
            pix: Duration::hours(2),
            boleto: Duration::hours(48),
        };

        let mut pix = test_order(PaymentMethod::Pix);
        pix.updated_at = Utc::now() - Duration::hours(3);
        let pix_id = pix.id;

        let mut boleto = test_order(PaymentMethod::Boleto);
        boleto.updated_at = Utc::now() - Duration::hours(3);

        store.insert(pix).await.unwrap();
        store.insert(boleto).await.unwrap();

        let stale = store
            .find_stale(Utc::now(), &thresholds, 10)
            .await
            .unwrap();
        let ids: Vec<OrderId> = stale.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![pix_id], "boleto is inside its 48h window");
    }

    #[tokio::test]
    async fn completed_ungranted_until_marked() {
        let store = InMemoryOrderStore::new();
        let order = test_order(PaymentMethod::Pix);
        let id = order.id;
        store.insert(order).await.unwrap();
        store.apply_transition(id, paid_request()).await.unwrap();

        let pending = store.find_completed_ungranted(10).await.unwrap();
        assert_eq!(pending.len(), 1);

        store.mark_entitlements_granted(id, Utc::now()).await.unwrap();
        let pending = store.find_completed_ungranted(10).await.unwrap();
        assert!(pending.is_empty());
    }
}
