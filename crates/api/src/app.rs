//! Router and request handlers for the checkout core.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use coursemart_checkout::{
    CheckoutError, CheckoutService, IdentityService, ProductCatalog,
};
use coursemart_core::OrderId;
use coursemart_entitlements::Granter;
use coursemart_gateway::{PaymentGateway, WebhookAdapter, WebhookError};
use coursemart_orders::{EventSource, OrderStore};

use crate::dto::{outcome_to_json, CheckoutBody};

/// Port-erased orchestrator: concrete store/gateway choices are made at
/// startup (in-memory vs Postgres, HTTP vs mock) without touching handlers.
pub type DynOrderStore = Arc<dyn OrderStore>;
pub type DynGateway = Arc<dyn PaymentGateway>;
pub type DynCatalog = Arc<dyn ProductCatalog>;
pub type DynIdentity = Arc<dyn IdentityService>;
pub type DynGranter = Arc<dyn Granter>;
pub type AppCheckout =
    CheckoutService<DynOrderStore, DynGateway, DynCatalog, DynIdentity, DynGranter>;

pub struct AppState {
    pub checkout: Arc<AppCheckout>,
    pub webhooks: WebhookAdapter,
}

impl AppState {
    pub fn new(checkout: Arc<AppCheckout>, webhooks: WebhookAdapter) -> Self {
        Self { checkout, webhooks }
    }
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/checkout", post(create_checkout))
        .route("/checkout/status/:order_id", get(checkout_status))
        .route("/webhook/:rail", post(webhook))
        .layer(Extension(state))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_checkout(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CheckoutBody>,
) -> axum::response::Response {
    let request = match body.into_request() {
        Ok(request) => request,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, "invalid_request", message),
    };

    match state.checkout.create_checkout(request).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome_to_json(&outcome))).into_response(),
        Err(e) => checkout_error_to_response(e),
    }
}

async fn checkout_status(
    Extension(state): Extension<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match order_id.parse() {
        Ok(id) => id,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };

    match state.checkout.status(order_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => checkout_error_to_response(e),
    }
}

/// Gateway-facing notification endpoint. Not user-facing: responses exist
/// to steer provider retries, nothing more.
async fn webhook(
    Extension(state): Extension<Arc<AppState>>,
    Path(rail): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok());

    let notification = match state.webhooks.decode(&rail, signature, &body) {
        Ok(notification) => notification,
        Err(e) => return webhook_error_to_response(e),
    };

    match state
        .checkout
        .record_notification(&notification, EventSource::Webhook)
        .await
    {
        // Applied, duplicate, rejected: all recorded, all acknowledged so
        // the provider stops retrying.
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => checkout_error_to_response(e),
    }
}

fn webhook_error_to_response(err: WebhookError) -> axum::response::Response {
    match &err {
        WebhookError::UnknownRail(rail) => {
            tracing::warn!(rail, "webhook for unknown rail");
            json_error(StatusCode::NOT_FOUND, "unknown_rail", err.to_string())
        }
        WebhookError::MissingSignature
        | WebhookError::BadSignature
        | WebhookError::MissingSecret(_) => {
            tracing::warn!("webhook rejected: {err}");
            json_error(StatusCode::UNAUTHORIZED, "unverified", "signature verification failed")
        }
        WebhookError::Malformed(_) => {
            tracing::warn!("webhook rejected: {err}");
            json_error(StatusCode::BAD_REQUEST, "malformed", err.to_string())
        }
    }
}

fn checkout_error_to_response(err: CheckoutError) -> axum::response::Response {
    match &err {
        CheckoutError::Validation(message) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message.clone())
        }
        // Operator-visible (already logged at error level); the caller only
        // learns the charge is unknown.
        CheckoutError::UnknownCharge(_) => {
            json_error(StatusCode::NOT_FOUND, "unknown_charge", err.to_string())
        }
        CheckoutError::NotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        CheckoutError::Catalog(_) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "catalog_unavailable",
            err.to_string(),
        ),
        CheckoutError::Store(_) => {
            tracing::error!("store failure: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal error")
        }
    }
}

fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
