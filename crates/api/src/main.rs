use std::sync::Arc;

use sqlx::PgPool;

use coursemart_api::app::{
    build_app, AppCheckout, AppState, DynCatalog, DynGateway, DynGranter, DynIdentity,
    DynOrderStore,
};
use coursemart_api::config::ApiConfig;
use coursemart_checkout::{CheckoutService, InMemoryCatalog, InMemoryIdentity};
use coursemart_core::PaymentMethod;
use coursemart_entitlements::{
    EntitlementGranter, InMemoryEnrollments, InMemoryGrantStore, InMemoryLibrary,
};
use coursemart_gateway::{HttpGateway, MockGateway, WebhookAdapter, WebhookVerifier};
use coursemart_infra::{ensure_schema, PostgresGrantStore, PostgresOrderStore};
use coursemart_orders::InMemoryOrderStore;
use coursemart_reconcile::ReconciliationPoller;

#[tokio::main]
async fn main() {
    coursemart_observability::init();

    let config = ApiConfig::from_env();

    let (order_store, grant_store): (DynOrderStore, Arc<dyn coursemart_entitlements::GrantStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url)
                    .await
                    .expect("failed to connect to Postgres");
                ensure_schema(&pool).await.expect("failed to apply schema");
                (
                    Arc::new(PostgresOrderStore::new(pool.clone())),
                    Arc::new(PostgresGrantStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory stores (dev only)");
                (
                    Arc::new(InMemoryOrderStore::new()),
                    Arc::new(InMemoryGrantStore::new()),
                )
            }
        };

    let gateway: DynGateway = match &config.gateway_base_url {
        Some(base_url) => Arc::new(
            HttpGateway::new(base_url.clone(), config.gateway_api_key.clone())
                .expect("failed to build gateway client"),
        ),
        None => {
            tracing::warn!("GATEWAY_BASE_URL not set; using in-process mock gateway (dev only)");
            Arc::new(MockGateway::new())
        }
    };

    // Catalog, identity, and the entitlement collaborators are external
    // services consumed through ports; the in-memory versions stand in
    // until the real ones are wired.
    let catalog: DynCatalog = Arc::new(InMemoryCatalog::new());
    let identity: DynIdentity = Arc::new(InMemoryIdentity::new());
    let granter: DynGranter = Arc::new(EntitlementGranter::new(
        grant_store,
        Arc::new(InMemoryEnrollments::new()),
        Arc::new(InMemoryLibrary::new()),
    ));

    let checkout: Arc<AppCheckout> = Arc::new(CheckoutService::new(
        order_store,
        gateway,
        catalog,
        identity,
        granter,
    ));

    let mut verifier = WebhookVerifier::new();
    for (rail, secret) in [
        (PaymentMethod::CreditCard, &config.webhook_secret_card),
        (PaymentMethod::Pix, &config.webhook_secret_pix),
        (PaymentMethod::Boleto, &config.webhook_secret_boleto),
    ] {
        match secret {
            Some(secret) => verifier = verifier.with_secret(rail, secret.clone()),
            None => tracing::warn!(rail = rail.as_str(), "no webhook secret; rail webhooks will be rejected"),
        }
    }

    let poller = ReconciliationPoller::spawn(config.reconcile.clone(), checkout.clone());

    let state = Arc::new(AppState::new(checkout, WebhookAdapter::new(verifier)));
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind_addr));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
    poller.shutdown().await;
}
