//! End-to-end tests for the checkout core, wired with the in-memory stores
//! and the scriptable gateway.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use coursemart_checkout::{
    CheckoutRequest, CheckoutService, Customer, InMemoryCatalog, InMemoryIdentity,
    NotificationDisposition, PaymentInstructions,
};
use coursemart_core::{
    ChargeId, Money, OrderId, PayerDetails, PaymentMethod, ProductKind, ProductRef, UserId,
};
use coursemart_entitlements::{
    EntitlementGranter, GrantStore, InMemoryEnrollments, InMemoryGrantStore, InMemoryLibrary,
};
use coursemart_gateway::{
    CardOutcome, ChargeResponse, GatewayNotification, GatewayOutcome, MockGateway,
    WebhookAdapter, WebhookVerifier,
};
use coursemart_orders::{
    EventDisposition, EventSource, InMemoryOrderStore, OrderStatus, OrderStore, PaymentStatus,
    transition_allowed,
};
use coursemart_reconcile::{run_sweep, ReconcileConfig};

type Service = CheckoutService<
    Arc<InMemoryOrderStore>,
    Arc<MockGateway>,
    Arc<InMemoryCatalog>,
    Arc<InMemoryIdentity>,
    EntitlementGranter<Arc<InMemoryGrantStore>, Arc<InMemoryEnrollments>, Arc<InMemoryLibrary>>,
>;

struct Stack {
    service: Arc<Service>,
    store: Arc<InMemoryOrderStore>,
    gateway: Arc<MockGateway>,
    catalog: Arc<InMemoryCatalog>,
    grants: Arc<InMemoryGrantStore>,
    enrollments: Arc<InMemoryEnrollments>,
    library: Arc<InMemoryLibrary>,
}

fn stack() -> Stack {
    let store = Arc::new(InMemoryOrderStore::new());
    let gateway = Arc::new(MockGateway::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let grants = Arc::new(InMemoryGrantStore::new());
    let enrollments = Arc::new(InMemoryEnrollments::new());
    let library = Arc::new(InMemoryLibrary::new());
    let service = Arc::new(CheckoutService::new(
        store.clone(),
        gateway.clone(),
        catalog.clone(),
        Arc::new(InMemoryIdentity::new()),
        EntitlementGranter::new(grants.clone(), enrollments.clone(), library.clone()),
    ));
    Stack {
        service,
        store,
        gateway,
        catalog,
        grants,
        enrollments,
        library,
    }
}

fn payer() -> PayerDetails {
    PayerDetails {
        name: "Ana Souza".to_string(),
        email: "ana@example.com".to_string(),
        tax_document: Some("12345678909".to_string()),
    }
}

fn checkout_request(items: Vec<ProductRef>, method: PaymentMethod, user: UserId) -> CheckoutRequest {
    CheckoutRequest {
        customer: Customer::Known(user),
        items,
        payment_method: method,
        payer: payer(),
        card: match method {
            PaymentMethod::CreditCard => Some(coursemart_gateway::CardDetails {
                token: "tok_test".to_string(),
                installments: 1,
            }),
            _ => None,
        },
    }
}

async fn charge_of(store: &InMemoryOrderStore, order_id: OrderId) -> ChargeId {
    store
        .get(order_id)
        .await
        .unwrap()
        .unwrap()
        .charge_id
        .expect("charge issued")
}

fn paid(charge_id: ChargeId) -> GatewayNotification {
    GatewayNotification {
        charge_id,
        outcome: GatewayOutcome::Paid,
        raw: serde_json::json!({"event": "boleto.settled"}),
    }
}

/// Scenario: one course for 19900 over PIX. Order is created pending with a
/// PIX payload and no entitlement; the paid webhook completes it and grants
/// exactly one enrollment.
#[tokio::test]
async fn pix_course_checkout_completes_on_webhook() {
    let s = stack();
    let course = s
        .catalog
        .add_new(ProductKind::Course, "Rust course", Money::from_minor_units(19900));
    let user = UserId::new();

    let outcome = s
        .service
        .create_checkout(checkout_request(vec![course], PaymentMethod::Pix, user))
        .await
        .unwrap();

    assert_eq!(outcome.status, OrderStatus::Pending);
    assert_eq!(outcome.payment_status, PaymentStatus::Pending);
    assert!(matches!(outcome.payment, PaymentInstructions::Pix { .. }));
    assert!(s.grants.is_empty());

    let order = s.store.get(outcome.order_id).await.unwrap().unwrap();
    assert_eq!(order.total, Money::from_minor_units(19900));

    let charge = charge_of(&s.store, outcome.order_id).await;
    let disposition = s
        .service
        .record_notification(&paid(charge), EventSource::Webhook)
        .await
        .unwrap();
    assert!(matches!(
        disposition,
        NotificationDisposition::Applied {
            status: OrderStatus::Completed,
            ..
        }
    ));

    let grants = s.grants.grants_for_order(outcome.order_id).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].product, course);
    assert!(s.enrollments.is_enrolled(user, course.id));
}

/// Scenario: synchronous card decline. The order cancels immediately, the
/// response carries the decline reason, and nothing is granted.
#[tokio::test]
async fn declined_card_cancels_synchronously() {
    let s = stack();
    let paper = s
        .catalog
        .add_new(ProductKind::Paper, "Ownership paper", Money::from_minor_units(4990));
    s.gateway.script_charge(Ok(ChargeResponse::CreditCard {
        charge_id: ChargeId::new("ch_card_1"),
        outcome: CardOutcome::Declined {
            reason: "card expired".to_string(),
        },
        raw: serde_json::json!({"status": "declined", "reason": "card expired"}),
    }));

    let outcome = s
        .service
        .create_checkout(checkout_request(
            vec![paper],
            PaymentMethod::CreditCard,
            UserId::new(),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, OrderStatus::Canceled);
    assert_eq!(outcome.payment_status, PaymentStatus::Declined);
    match outcome.payment {
        PaymentInstructions::CreditCard {
            outcome: CardOutcome::Declined { reason },
        } => assert_eq!(reason, "card expired"),
        other => panic!("expected decline, got {other:?}"),
    }
    assert!(s.grants.is_empty());
}

/// Scenario: two webhook deliveries for the same boleto charge race each
/// other. Exactly one transition applies, the duplicate is recorded as
/// rejected, and each item is granted exactly once.
#[tokio::test]
async fn racing_boleto_webhooks_complete_once() {
    let s = stack();
    let course = s
        .catalog
        .add_new(ProductKind::Course, "Rust course", Money::from_minor_units(19900));
    let ebook = s
        .catalog
        .add_new(ProductKind::Ebook, "Async e-book", Money::from_minor_units(2990));
    let user = UserId::new();

    let outcome = s
        .service
        .create_checkout(checkout_request(
            vec![course, ebook],
            PaymentMethod::Boleto,
            user,
        ))
        .await
        .unwrap();
    let charge = charge_of(&s.store, outcome.order_id).await;

    let a = tokio::spawn({
        let service = s.service.clone();
        let n = paid(charge.clone());
        async move { service.record_notification(&n, EventSource::Webhook).await.unwrap() }
    });
    let b = tokio::spawn({
        let service = s.service.clone();
        let n = paid(charge);
        async move { service.record_notification(&n, EventSource::Webhook).await.unwrap() }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let applied = [&a, &b]
        .iter()
        .filter(|d| matches!(d, NotificationDisposition::Applied { .. }))
        .count();
    assert_eq!(applied, 1, "exactly one delivery wins");

    let history = s.store.history(outcome.order_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        history
            .iter()
            .filter(|e| e.disposition == EventDisposition::Applied)
            .count(),
        1
    );

    let grants = s.grants.grants_for_order(outcome.order_id).await.unwrap();
    assert_eq!(grants.len(), 2, "one grant per item");
    assert!(s.enrollments.is_enrolled(user, course.id));
    assert!(s.library.is_unlocked(user, ebook.id));
}

/// Scenario: out-of-order delivery. A completed order receiving a stray
/// "pending" stays completed; the rejection is recorded.
#[tokio::test]
async fn stray_pending_after_completion_is_rejected_and_audited() {
    let s = stack();
    let course = s
        .catalog
        .add_new(ProductKind::Course, "Rust course", Money::from_minor_units(19900));

    let outcome = s
        .service
        .create_checkout(checkout_request(vec![course], PaymentMethod::Pix, UserId::new()))
        .await
        .unwrap();
    let charge = charge_of(&s.store, outcome.order_id).await;

    s.service
        .record_notification(&paid(charge.clone()), EventSource::Webhook)
        .await
        .unwrap();

    let stray = GatewayNotification {
        charge_id: charge,
        outcome: GatewayOutcome::Pending,
        raw: serde_json::json!({"event": "late_pending"}),
    };
    let disposition = s
        .service
        .record_notification(&stray, EventSource::Webhook)
        .await
        .unwrap();
    assert!(matches!(disposition, NotificationDisposition::Rejected { .. }));

    let order = s.store.get(outcome.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);

    let history = s.store.history(outcome.order_id).await.unwrap();
    let rejected = history.last().unwrap();
    assert_eq!(rejected.disposition, EventDisposition::Rejected);
    assert_eq!(rejected.raw_payload["event"], "late_pending");
}

/// Boundary: a PIX order whose webhook never arrives is picked up by the
/// reconciliation sweep and completed from a status poll alone.
#[tokio::test]
async fn lost_webhook_is_recovered_by_the_sweep() {
    let s = stack();
    let course = s
        .catalog
        .add_new(ProductKind::Course, "Rust course", Money::from_minor_units(19900));
    let user = UserId::new();

    let outcome = s
        .service
        .create_checkout(checkout_request(vec![course], PaymentMethod::Pix, user))
        .await
        .unwrap();
    let charge = charge_of(&s.store, outcome.order_id).await;
    s.gateway.set_status(charge, GatewayOutcome::Paid);

    let config = ReconcileConfig::default()
        .with_pix_pending_after(chrono::Duration::zero());
    let stats = run_sweep(s.service.as_ref(), &config).await;
    assert_eq!(stats.polled, 1);

    let order = s.store.get(outcome.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert!(s.enrollments.is_enrolled(user, course.id));

    let history = s.store.history(outcome.order_id).await.unwrap();
    assert_eq!(history.last().unwrap().source, EventSource::Poll);
}

/// Full inbound path: a signed webhook body goes through verification,
/// decoding, and the state machine in one pass.
#[tokio::test]
async fn signed_webhook_flows_end_to_end() {
    let s = stack();
    let course = s
        .catalog
        .add_new(ProductKind::Course, "Rust course", Money::from_minor_units(19900));
    let outcome = s
        .service
        .create_checkout(checkout_request(vec![course], PaymentMethod::Pix, UserId::new()))
        .await
        .unwrap();
    let charge = charge_of(&s.store, outcome.order_id).await;

    let adapter = WebhookAdapter::new(
        WebhookVerifier::new().with_secret(PaymentMethod::Pix, "pix-secret"),
    );
    let body = serde_json::to_vec(&serde_json::json!({
        "event": "PIX_CONFIRMED",
        "txid": charge.as_str(),
    }))
    .unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"pix-secret").unwrap();
    mac.update(&body);
    let signature = hex::encode(mac.finalize().into_bytes());

    let notification = adapter.decode("pix", Some(&signature), &body).unwrap();
    let disposition = s
        .service
        .record_notification(&notification, EventSource::Webhook)
        .await
        .unwrap();
    assert!(matches!(
        disposition,
        NotificationDisposition::Applied {
            status: OrderStatus::Completed,
            ..
        }
    ));
}

/// The applied subsequence of any order's history is a legal path through
/// the transition table, and the total never drifts from the item sum.
#[tokio::test]
async fn history_path_and_total_invariants_hold() {
    let s = stack();
    let course = s
        .catalog
        .add_new(ProductKind::Course, "Rust course", Money::from_minor_units(19900));
    let ebook = s
        .catalog
        .add_new(ProductKind::Ebook, "Async e-book", Money::from_minor_units(2990));

    let outcome = s
        .service
        .create_checkout(checkout_request(
            vec![course, ebook],
            PaymentMethod::Boleto,
            UserId::new(),
        ))
        .await
        .unwrap();
    let charge = charge_of(&s.store, outcome.order_id).await;

    // A noisy delivery sequence: pending, paid, duplicate paid, stray expired.
    for outcome_kind in [
        GatewayOutcome::Pending,
        GatewayOutcome::Paid,
        GatewayOutcome::Paid,
        GatewayOutcome::Expired,
    ] {
        let n = GatewayNotification {
            charge_id: charge.clone(),
            outcome: outcome_kind,
            raw: serde_json::json!({"status": outcome_kind.as_str()}),
        };
        s.service
            .record_notification(&n, EventSource::Webhook)
            .await
            .unwrap();
    }

    let order = s.store.get(outcome.order_id).await.unwrap().unwrap();
    assert_eq!(
        Money::checked_sum(order.items.iter().map(|i| i.unit_price)).unwrap(),
        order.total
    );

    let history = s.store.history(outcome.order_id).await.unwrap();
    assert!(history
        .windows(2)
        .all(|w| w[0].recorded_at <= w[1].recorded_at));

    let mut current = OrderStatus::Pending;
    for event in history.iter().filter(|e| e.disposition == EventDisposition::Applied) {
        assert_eq!(event.previous, current);
        assert!(transition_allowed(event.previous, event.next));
        current = event.next;
    }
    assert_eq!(current, OrderStatus::Completed);
}
