//! Checkout execution pipeline (application-level orchestration).
//!
//! `CheckoutService` drives the full order lifecycle: validate against the
//! catalog, persist the order, issue the charge, and apply every later
//! confirmation through the store's atomic transition. Webhooks and the
//! reconciliation poller feed the same entry point
//! ([`CheckoutService::record_notification`]), so delivery source never
//! changes semantics.
//!
//! Execution guarantees:
//! - The order is persisted `Pending` **before** the gateway is contacted;
//!   a crash between the two leaves a recoverable pending order, not an
//!   orphaned charge.
//! - Once a charge id is recorded, no path re-issues a charge for the same
//!   order.
//! - Entitlements are granted exactly once, on the first arrival at
//!   `Completed`, with a compensating sweep for grant failures after the
//!   status commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use coursemart_core::{ChargeId, Money, OrderId, PayerDetails, PaymentMethod, ProductRef, UserId};
use coursemart_entitlements::Granter;
use coursemart_gateway::{
    CardDetails, CardOutcome, ChargeRequest, ChargeResponse, GatewayError, GatewayNotification,
    GatewayOutcome, PaymentGateway,
};
use coursemart_orders::{
    EventSource, Order, OrderItem, OrderStatus, OrderStore, PaymentStatus, StaleThresholds,
    TransitionOutcome, TransitionRequest,
};

use crate::error::CheckoutError;
use crate::ports::{IdentityService, ProductCatalog, SessionToken};

/// Who is checking out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Customer {
    Known(UserId),
    /// Unauthenticated visitor; an account is created in-line.
    Guest { email: String, password: String },
}

/// Checkout request. Carries product *references* only — prices always come
/// from the catalog.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer: Customer,
    pub items: Vec<ProductRef>,
    pub payment_method: PaymentMethod,
    pub payer: PayerDetails,
    pub card: Option<CardDetails>,
}

/// Method-discriminated payment data returned to the caller. Absence of an
/// immediate confirmation means "wait for async resolution", not failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentInstructions {
    CreditCard {
        outcome: CardOutcome,
    },
    Pix {
        qr_code: String,
        qr_code_image: Option<String>,
        expires_at: DateTime<Utc>,
    },
    Boleto {
        url: String,
        digitable_line: String,
        due_date: DateTime<Utc>,
    },
    /// The gateway could not be reached; the order is pending with no
    /// charge and may be retried.
    AwaitingRetry,
    /// A charge already exists for this order (idempotent retry path);
    /// confirmation will arrive asynchronously.
    AlreadyIssued,
}

/// Result of the guest identity-elevation step, reported distinctly from
/// the payment result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// Checkout was made by an authenticated user.
    NotRequired,
    Attached {
        user_id: UserId,
        /// `None` when the account was created but session issuance failed.
        session: Option<SessionToken>,
    },
    /// Account creation failed. The order (and any charge reference) is
    /// preserved; only the identity step failed.
    Failed { reason: String },
}

/// Response of `create_checkout`/`retry_charge`.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment: PaymentInstructions,
    pub identity: IdentityOutcome,
}

/// What one delivery did to the order. Duplicates and rejections are normal
/// results here, recorded in the audit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDisposition {
    Applied { order_id: OrderId, status: OrderStatus },
    Duplicate { order_id: OrderId, status: OrderStatus },
    Rejected { order_id: OrderId, status: OrderStatus },
}

/// Read-only view for client polling.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub total: Money,
    pub charge_id: Option<ChargeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the reconciliation sweep did for one stale order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Polled(NotificationDisposition),
    ChargeReissued,
    Skipped(&'static str),
}

/// Reusable checkout engine, generic over its ports.
#[derive(Debug)]
pub struct CheckoutService<S, G, C, I, R> {
    store: S,
    gateway: G,
    catalog: C,
    identity: I,
    granter: R,
}

impl<S, G, C, I, R> CheckoutService<S, G, C, I, R> {
    pub fn new(store: S, gateway: G, catalog: C, identity: I, granter: R) -> Self {
        Self {
            store,
            gateway,
            catalog,
            identity,
            granter,
        }
    }
}

/// Map a normalized gateway outcome onto a state-machine target.
fn outcome_targets(outcome: GatewayOutcome) -> (OrderStatus, PaymentStatus) {
    match outcome {
        GatewayOutcome::Paid => (OrderStatus::Completed, PaymentStatus::Paid),
        GatewayOutcome::Pending => (OrderStatus::Processing, PaymentStatus::Pending),
        GatewayOutcome::Declined => (OrderStatus::Canceled, PaymentStatus::Declined),
        GatewayOutcome::Expired => (OrderStatus::Canceled, PaymentStatus::Expired),
        GatewayOutcome::Refunded => (OrderStatus::Canceled, PaymentStatus::Refunded),
        GatewayOutcome::Canceled => (OrderStatus::Canceled, PaymentStatus::Canceled),
    }
}

impl<S, G, C, I, R> CheckoutService<S, G, C, I, R>
where
    S: OrderStore,
    G: PaymentGateway,
    C: ProductCatalog,
    I: IdentityService,
    R: Granter,
{
    /// Create an order and issue its charge.
    ///
    /// Pipeline:
    /// 1. Resolve items against the catalog (canonical prices only).
    /// 2. Persist the order `Pending` — before any gateway traffic.
    /// 3. Guest checkout: identity elevation (failure reported, never fatal).
    /// 4. Dispatch the charge; synchronous card outcomes are applied as the
    ///    first status event, async rails return their payment payload.
    pub async fn create_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if request.items.is_empty() {
            return Err(CheckoutError::Validation(
                "checkout requires at least one item".to_string(),
            ));
        }
        if request.payment_method == PaymentMethod::CreditCard && request.card.is_none() {
            return Err(CheckoutError::Validation(
                "card details are required for credit card checkout".to_string(),
            ));
        }

        // 1) Canonical prices; unknown products fail before persistence.
        let mut items = Vec::with_capacity(request.items.len());
        for product in &request.items {
            let snapshot = self
                .catalog
                .resolve(product)
                .await?
                .ok_or_else(|| {
                    CheckoutError::Validation(format!(
                        "product {} is not purchasable",
                        product.id
                    ))
                })?;
            items.push(OrderItem {
                product: *product,
                title: snapshot.title,
                unit_price: snapshot.price,
            });
        }

        let user = match &request.customer {
            Customer::Known(user_id) => Some(*user_id),
            Customer::Guest { .. } => None,
        };

        // 2) Persist before contacting the gateway.
        let order = Order::create(
            OrderId::new(),
            user,
            request.payer.clone(),
            items,
            request.payment_method,
            Utc::now(),
        )
        .map_err(|e| CheckoutError::Validation(e.to_string()))?;
        self.store.insert(order.clone()).await?;
        info!(order_id = %order.id, method = %order.payment_method, total = %order.total, "order created");

        // 3) Identity elevation for guests.
        let identity = match &request.customer {
            Customer::Known(_) => IdentityOutcome::NotRequired,
            Customer::Guest { email, password } => {
                self.elevate_guest(order.id, email, password).await
            }
        };

        // 4) Charge. The order (and its user attachment) is already durable.
        let payment = self.issue_charge(&order, request.card.as_ref()).await?;

        let current = self
            .store
            .get(order.id)
            .await?
            .ok_or(CheckoutError::NotFound(order.id))?;

        Ok(CheckoutOutcome {
            order_id: current.id,
            status: current.status,
            payment_status: current.payment_status,
            payment,
            identity,
        })
    }

    /// Re-issue the charge for an order left pending with no charge id.
    /// Never double-charges: an existing charge id short-circuits.
    pub async fn retry_charge(
        &self,
        order_id: OrderId,
        card: Option<CardDetails>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(order_id))?;

        if order.status.is_terminal() {
            return Err(CheckoutError::Validation(format!(
                "order is closed ({})",
                order.status
            )));
        }

        let payment = if order.charge_id.is_some() {
            PaymentInstructions::AlreadyIssued
        } else {
            if order.payment_method == PaymentMethod::CreditCard && card.is_none() {
                return Err(CheckoutError::Validation(
                    "card details are required to retry a credit card charge".to_string(),
                ));
            }
            self.issue_charge(&order, card.as_ref()).await?
        };

        let current = self
            .store
            .get(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(order_id))?;

        Ok(CheckoutOutcome {
            order_id,
            status: current.status,
            payment_status: current.payment_status,
            payment,
            identity: IdentityOutcome::NotRequired,
        })
    }

    /// Apply one normalized gateway notification — the single entry point
    /// shared by webhook delivery and the reconciliation poller.
    pub async fn record_notification(
        &self,
        notification: &GatewayNotification,
        source: EventSource,
    ) -> Result<NotificationDisposition, CheckoutError> {
        let order = self
            .store
            .find_by_charge(&notification.charge_id)
            .await?
            .ok_or_else(|| {
                error!(
                    charge_id = %notification.charge_id,
                    outcome = %notification.outcome,
                    "notification for unknown charge discarded"
                );
                CheckoutError::UnknownCharge(notification.charge_id.clone())
            })?;

        let (target, payment_status) = outcome_targets(notification.outcome);
        let outcome = self
            .store
            .apply_transition(
                order.id,
                TransitionRequest {
                    target,
                    payment_status,
                    source,
                    raw_payload: notification.raw.clone(),
                    occurred_at: Utc::now(),
                },
            )
            .await?;

        match &outcome {
            TransitionOutcome::Applied { previous, next } => {
                info!(
                    order_id = %order.id,
                    %previous,
                    %next,
                    source = source.as_str(),
                    "order status advanced"
                );
            }
            TransitionOutcome::Duplicate { current } => {
                debug!(
                    order_id = %order.id,
                    status = %current,
                    source = source.as_str(),
                    "duplicate delivery recorded"
                );
            }
            TransitionOutcome::Rejected { current, attempted } => {
                warn!(
                    order_id = %order.id,
                    status = %current,
                    attempted = %attempted,
                    source = source.as_str(),
                    "out-of-order delivery rejected"
                );
            }
        }

        if outcome.completed_now() {
            self.grant_for(order.id).await;
        }

        Ok(match outcome {
            TransitionOutcome::Applied { next, .. } => NotificationDisposition::Applied {
                order_id: order.id,
                status: next,
            },
            TransitionOutcome::Duplicate { current } => NotificationDisposition::Duplicate {
                order_id: order.id,
                status: current,
            },
            TransitionOutcome::Rejected { current, .. } => NotificationDisposition::Rejected {
                order_id: order.id,
                status: current,
            },
        })
    }

    /// Manual admin cancel, audited like any other delivery.
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
    ) -> Result<NotificationDisposition, CheckoutError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(order_id))?;

        let outcome = self
            .store
            .apply_transition(
                order.id,
                TransitionRequest {
                    target: OrderStatus::Canceled,
                    payment_status: PaymentStatus::Canceled,
                    source: EventSource::Manual,
                    raw_payload: serde_json::json!({"reason": "manual cancel"}),
                    occurred_at: Utc::now(),
                },
            )
            .await?;

        Ok(match outcome {
            TransitionOutcome::Applied { next, .. } => NotificationDisposition::Applied {
                order_id,
                status: next,
            },
            TransitionOutcome::Duplicate { current } => NotificationDisposition::Duplicate {
                order_id,
                status: current,
            },
            TransitionOutcome::Rejected { current, .. } => NotificationDisposition::Rejected {
                order_id,
                status: current,
            },
        })
    }

    /// Read-only view for client polling.
    pub async fn status(&self, order_id: OrderId) -> Result<StatusView, CheckoutError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(order_id))?;
        Ok(StatusView {
            order_id: order.id,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            total: order.total,
            charge_id: order.charge_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }

    // ---- reconciliation support -------------------------------------------

    pub async fn stale_orders(
        &self,
        now: DateTime<Utc>,
        thresholds: &StaleThresholds,
        limit: usize,
    ) -> Result<Vec<Order>, CheckoutError> {
        Ok(self.store.find_stale(now, thresholds, limit).await?)
    }

    pub async fn completed_ungranted(&self, limit: usize) -> Result<Vec<Order>, CheckoutError> {
        Ok(self.store.find_completed_ungranted(limit).await?)
    }

    /// Re-query the gateway for one stale order and feed the result through
    /// the normal notification path.
    pub async fn reconcile_order(
        &self,
        order: &Order,
    ) -> Result<ReconcileAction, CheckoutError> {
        match &order.charge_id {
            Some(charge_id) => match self.gateway.charge_status(charge_id).await {
                Ok(GatewayOutcome::Pending) if order.status == OrderStatus::Processing => {
                    // Nothing new; avoid spamming the audit history each sweep.
                    Ok(ReconcileAction::Skipped("charge still pending"))
                }
                Ok(outcome) => {
                    let notification = GatewayNotification {
                        charge_id: charge_id.clone(),
                        outcome,
                        raw: serde_json::json!({
                            "poll": {"charge_id": charge_id.as_str(), "status": outcome.as_str()},
                        }),
                    };
                    self.record_notification(&notification, EventSource::Poll)
                        .await
                        .map(ReconcileAction::Polled)
                }
                Err(e) => {
                    warn!(order_id = %order.id, "status poll failed: {e}");
                    Ok(ReconcileAction::Skipped("gateway unavailable"))
                }
            },
            None if order.payment_method.is_asynchronous()
                && order.status == OrderStatus::Pending =>
            {
                match self.issue_charge(order, None).await? {
                    PaymentInstructions::AwaitingRetry => {
                        Ok(ReconcileAction::Skipped("gateway unavailable"))
                    }
                    _ => Ok(ReconcileAction::ChargeReissued),
                }
            }
            // A charge-less card order needs fresh card details from the
            // buyer; the sweep cannot help it.
            None => Ok(ReconcileAction::Skipped("awaiting user-initiated retry")),
        }
    }

    /// Compensating sweep half: retry granting for a completed order whose
    /// grant step failed after the status commit.
    pub async fn retry_entitlements(&self, order: &Order) -> Result<bool, CheckoutError> {
        Ok(self.ensure_granted(order).await)
    }

    // ---- internals --------------------------------------------------------

    async fn elevate_guest(
        &self,
        order_id: OrderId,
        email: &str,
        password: &str,
    ) -> IdentityOutcome {
        let user_id = match self.identity.create_user_inline(email, password).await {
            Ok(user_id) => user_id,
            Err(e) => {
                // The order (and later its charge reference) stays on record;
                // only the identity step failed.
                error!(%order_id, "guest identity elevation failed: {e}");
                return IdentityOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if let Err(e) = self.store.attach_user(order_id, user_id).await {
            error!(%order_id, %user_id, "failed to attach user to order: {e}");
            return IdentityOutcome::Failed {
                reason: e.to_string(),
            };
        }

        match self.identity.issue_session(user_id).await {
            Ok(session) => IdentityOutcome::Attached {
                user_id,
                session: Some(session),
            },
            Err(e) => {
                warn!(%order_id, %user_id, "session issuance failed: {e}");
                IdentityOutcome::Attached {
                    user_id,
                    session: None,
                }
            }
        }
    }

    /// Issue the charge for `order` and, for the synchronous rail, apply
    /// the returned outcome as the first status event.
    async fn issue_charge(
        &self,
        order: &Order,
        card: Option<&CardDetails>,
    ) -> Result<PaymentInstructions, CheckoutError> {
        let request = ChargeRequest {
            order_id: order.id,
            amount: order.total,
            method: order.payment_method,
            payer: order.payer.clone(),
            card: card.cloned(),
        };

        let response = match self.gateway.create_charge(&request).await {
            Ok(response) => response,
            Err(GatewayError::Unavailable(e)) => {
                warn!(order_id = %order.id, "gateway unreachable, order stays pending: {e}");
                return Ok(PaymentInstructions::AwaitingRetry);
            }
            Err(GatewayError::Protocol(e)) => {
                error!(order_id = %order.id, "gateway protocol error, order stays pending: {e}");
                return Ok(PaymentInstructions::AwaitingRetry);
            }
        };

        self.store
            .set_charge(order.id, response.charge_id().clone())
            .await?;

        match response {
            ChargeResponse::CreditCard { outcome, raw, .. } => {
                let (target, payment_status) = match &outcome {
                    CardOutcome::Confirmed => (OrderStatus::Completed, PaymentStatus::Paid),
                    CardOutcome::Processing => (OrderStatus::Processing, PaymentStatus::Pending),
                    CardOutcome::Declined { .. } => {
                        (OrderStatus::Canceled, PaymentStatus::Declined)
                    }
                };
                let applied = self
                    .store
                    .apply_transition(
                        order.id,
                        TransitionRequest {
                            target,
                            payment_status,
                            source: EventSource::SyncResponse,
                            raw_payload: raw,
                            occurred_at: Utc::now(),
                        },
                    )
                    .await?;
                if applied.completed_now() {
                    self.grant_for(order.id).await;
                }
                Ok(PaymentInstructions::CreditCard { outcome })
            }
            ChargeResponse::Pix {
                qr_code,
                qr_code_image,
                expires_at,
                ..
            } => Ok(PaymentInstructions::Pix {
                qr_code,
                qr_code_image,
                expires_at,
            }),
            ChargeResponse::Boleto {
                url,
                digitable_line,
                due_date,
                ..
            } => Ok(PaymentInstructions::Boleto {
                url,
                digitable_line,
                due_date,
            }),
        }
    }

    /// Grant entitlements for a freshly completed order. Failures are
    /// operator-visible and left for the reconciliation sweep; the status is
    /// never rolled back — the customer did pay.
    async fn grant_for(&self, order_id: OrderId) {
        match self.store.get(order_id).await {
            Ok(Some(order)) => {
                self.ensure_granted(&order).await;
            }
            Ok(None) => error!(%order_id, "completed order vanished before granting"),
            Err(e) => error!(%order_id, "failed to load order for granting: {e}"),
        }
    }

    async fn ensure_granted(&self, order: &Order) -> bool {
        match self.granter.grant_if_needed(order).await {
            Ok(report) => {
                if let Err(e) = self
                    .store
                    .mark_entitlements_granted(order.id, Utc::now())
                    .await
                {
                    warn!(order_id = %order.id, "grant bookkeeping failed: {e}");
                }
                debug!(
                    order_id = %order.id,
                    granted = report.granted,
                    already_granted = report.already_granted,
                    "entitlements granted"
                );
                true
            }
            Err(e) => {
                error!(
                    order_id = %order.id,
                    "entitlement grant failed, left for reconciliation sweep: {e}"
                );
                false
            }
        }
    }
}
