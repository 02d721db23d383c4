//! The reconciliation poller task.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coursemart_checkout::{CheckoutService, IdentityService, ProductCatalog, ReconcileAction};
use coursemart_entitlements::Granter;
use coursemart_gateway::PaymentGateway;
use coursemart_orders::OrderStore;

use crate::config::ReconcileConfig;

/// Counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub polled: usize,
    pub charges_reissued: usize,
    pub skipped: usize,
    pub grants_retried: usize,
    pub grants_recovered: usize,
}

/// Run one sweep: re-query stale orders, then retry failed grants.
///
/// Safe to run concurrently with live webhook delivery — serialization is
/// the store's per-order atomic transition, not anything here.
pub async fn run_sweep<S, G, C, I, R>(
    checkout: &CheckoutService<S, G, C, I, R>,
    config: &ReconcileConfig,
) -> SweepStats
where
    S: OrderStore,
    G: PaymentGateway,
    C: ProductCatalog,
    I: IdentityService,
    R: Granter,
{
    let mut stats = SweepStats::default();
    let thresholds = config.thresholds();

    match checkout
        .stale_orders(Utc::now(), &thresholds, config.batch_limit)
        .await
    {
        Ok(stale) => {
            stats.examined = stale.len();
            for order in stale {
                match checkout.reconcile_order(&order).await {
                    Ok(ReconcileAction::Polled(disposition)) => {
                        stats.polled += 1;
                        debug!(order_id = %order.id, ?disposition, "stale order polled");
                    }
                    Ok(ReconcileAction::ChargeReissued) => {
                        stats.charges_reissued += 1;
                        info!(order_id = %order.id, "charge reissued for stale order");
                    }
                    Ok(ReconcileAction::Skipped(reason)) => {
                        stats.skipped += 1;
                        debug!(order_id = %order.id, reason, "stale order skipped");
                    }
                    Err(e) => {
                        stats.skipped += 1;
                        warn!(order_id = %order.id, "reconcile failed: {e}");
                    }
                }
            }
        }
        Err(e) => warn!("stale order query failed: {e}"),
    }

    match checkout.completed_ungranted(config.batch_limit).await {
        Ok(ungranted) => {
            for order in ungranted {
                stats.grants_retried += 1;
                match checkout.retry_entitlements(&order).await {
                    Ok(true) => {
                        stats.grants_recovered += 1;
                        info!(order_id = %order.id, "entitlements recovered by sweep");
                    }
                    Ok(false) => {}
                    Err(e) => warn!(order_id = %order.id, "grant retry failed: {e}"),
                }
            }
        }
        Err(e) => warn!("ungranted order query failed: {e}"),
    }

    stats
}

/// Handle to control a running poller.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Request graceful shutdown and wait for the task to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}

/// Periodic reconciliation sweep over a shared [`CheckoutService`].
#[derive(Debug)]
pub struct ReconciliationPoller;

impl ReconciliationPoller {
    /// Spawn the background task. Ticks every `config.interval` until the
    /// handle requests shutdown.
    pub fn spawn<S, G, C, I, R>(
        config: ReconcileConfig,
        checkout: Arc<CheckoutService<S, G, C, I, R>>,
    ) -> PollerHandle
    where
        S: OrderStore + 'static,
        G: PaymentGateway + 'static,
        C: ProductCatalog + 'static,
        I: IdentityService + 'static,
        R: Granter + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            // The immediate first tick would race service startup; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("reconciliation poller shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let stats = run_sweep(checkout.as_ref(), &config).await;
                        if stats.examined > 0 || stats.grants_retried > 0 {
                            info!(
                                examined = stats.examined,
                                polled = stats.polled,
                                reissued = stats.charges_reissued,
                                skipped = stats.skipped,
                                grants_retried = stats.grants_retried,
                                grants_recovered = stats.grants_recovered,
                                "reconciliation sweep finished"
                            );
                        }
                    }
                }
            }
        });

        PollerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use coursemart_checkout::{
        CheckoutRequest, Customer, InMemoryCatalog, InMemoryIdentity,
    };
    use coursemart_core::{
        Money, PayerDetails, PaymentMethod, ProductKind, UserId,
    };
    use coursemart_entitlements::{
        EntitlementGranter, InMemoryEnrollments, InMemoryGrantStore, InMemoryLibrary,
    };
    use coursemart_gateway::{GatewayOutcome, MockGateway};
    use coursemart_orders::{InMemoryOrderStore, OrderStatus};

    type TestService = CheckoutService<
        Arc<InMemoryOrderStore>,
        Arc<MockGateway>,
        Arc<InMemoryCatalog>,
        Arc<InMemoryIdentity>,
        EntitlementGranter<
            Arc<InMemoryGrantStore>,
            Arc<InMemoryEnrollments>,
            Arc<InMemoryLibrary>,
        >,
    >;

    struct Stack {
        service: Arc<TestService>,
        store: Arc<InMemoryOrderStore>,
        gateway: Arc<MockGateway>,
        catalog: Arc<InMemoryCatalog>,
    }

    fn stack() -> Stack {
        let store = Arc::new(InMemoryOrderStore::new());
        let gateway = Arc::new(MockGateway::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let service = Arc::new(CheckoutService::new(
            store.clone(),
            gateway.clone(),
            catalog.clone(),
            Arc::new(InMemoryIdentity::new()),
            EntitlementGranter::new(
                Arc::new(InMemoryGrantStore::new()),
                Arc::new(InMemoryEnrollments::new()),
                Arc::new(InMemoryLibrary::new()),
            ),
        ));
        Stack {
            service,
            store,
            gateway,
            catalog,
        }
    }

    /// Thresholds of zero make every non-terminal order immediately stale.
    fn eager_config() -> ReconcileConfig {
        ReconcileConfig::default()
            .with_interval(Duration::from_millis(10))
            .with_card_pending_after(ChronoDuration::zero())
            .with_pix_pending_after(ChronoDuration::zero())
            .with_boleto_pending_after(ChronoDuration::zero())
    }

    async fn pending_pix_order(s: &Stack) -> coursemart_core::OrderId {
        let course = s.catalog.add_new(
            ProductKind::Course,
            "Rust course",
            Money::from_minor_units(19900),
        );
        let outcome = s
            .service
            .create_checkout(CheckoutRequest {
                customer: Customer::Known(UserId::new()),
                items: vec![course],
                payment_method: PaymentMethod::Pix,
                payer: PayerDetails {
                    name: "Ana".to_string(),
                    email: "ana@example.com".to_string(),
                    tax_document: None,
                },
                card: None,
            })
            .await
            .unwrap();
        outcome.order_id
    }

    #[tokio::test]
    async fn sweep_completes_stale_order_without_a_webhook() {
        let s = stack();
        let order_id = pending_pix_order(&s).await;
        let charge_id = s
            .store
            .get(order_id)
            .await
            .unwrap()
            .unwrap()
            .charge_id
            .unwrap();

        // The webhook never arrives, but the gateway knows the charge paid.
        s.gateway.set_status(charge_id, GatewayOutcome::Paid);

        let stats = run_sweep(s.service.as_ref(), &eager_config()).await;
        assert_eq!(stats.polled, 1);

        let order = s.store.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.entitlements_granted_at.is_some());
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_orders_alone() {
        let s = stack();
        let order_id = pending_pix_order(&s).await;

        // Default thresholds: a freshly created PIX order is not stale.
        let stats = run_sweep(s.service.as_ref(), &ReconcileConfig::default()).await;
        assert_eq!(stats.examined, 0);
        assert_eq!(
            s.store.get(order_id).await.unwrap().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn spawned_poller_converges_and_shuts_down() {
        let s = stack();
        let order_id = pending_pix_order(&s).await;
        let charge_id = s
            .store
            .get(order_id)
            .await
            .unwrap()
            .unwrap()
            .charge_id
            .unwrap();
        s.gateway.set_status(charge_id, GatewayOutcome::Paid);

        let handle = ReconciliationPoller::spawn(eager_config(), s.service.clone());

        // Give the poller a few ticks to pick the order up.
        let mut completed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let order = s.store.get(order_id).await.unwrap().unwrap();
            if order.status == OrderStatus::Completed {
                completed = true;
                break;
            }
        }
        handle.shutdown().await;
        assert!(completed, "poller should complete the stale order");
    }
}
