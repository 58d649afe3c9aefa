use anyhow::Context;
use charter_api::app;
use charter_api::state::{AppState, Settings, WebhookConfig};
use charter_booking::{CheckoutUrls, MockPaymentGateway};
use charter_catalog::{CachePolicy, CachedCatalog};
use charter_core::payment::PaymentGateway;
use charter_core::repository::{CatalogProvider, ReservationStore};
use charter_core::SystemClock;
use charter_store::app_config::{Config, PaymentProvider};
use charter_store::{DbClient, PgCatalogProvider, PgReservationStore, RedisClient, StripeGateway};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "charter_api=debug,charter_booking=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting charter booking API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = &config.business_rules;
    let catalog: Arc<dyn CatalogProvider> = Arc::new(CachedCatalog::new(
        Arc::new(PgCatalogProvider::new(db.pool.clone())),
        CachePolicy {
            ttl: Duration::from_secs(rules.catalog_cache_ttl_seconds),
            stale_for: Duration::from_secs(rules.catalog_stale_seconds),
            timeout: Duration::from_millis(rules.catalog_timeout_ms),
        },
    ));
    let store: Arc<dyn ReservationStore> = Arc::new(PgReservationStore::new(db.pool.clone()));

    let payments = &config.payments;
    let gateway: Arc<dyn PaymentGateway> = match payments.provider {
        PaymentProvider::Stripe => Arc::new(
            StripeGateway::new(&payments.api_base, &payments.secret_key, payments.timeout())
                .context("Failed to build Stripe client")?,
        ),
        PaymentProvider::Mock => {
            tracing::warn!("Using the mock payment gateway; no money will move");
            Arc::new(MockPaymentGateway::new())
        }
    };

    let settings = Settings {
        hold_minutes: rules.hold_minutes,
        sweep_batch: rules.expiry_sweep_batch,
        gateway_timeout: payments.timeout(),
        urls: CheckoutUrls {
            success_url: payments.success_url.clone(),
            cancel_url: payments.cancel_url.clone(),
        },
        webhook: WebhookConfig {
            secret: payments.webhook_secret.clone(),
            tolerance_seconds: payments.signature_tolerance_seconds,
        },
    };
    let mut state = AppState::new(catalog, store, gateway, Arc::new(SystemClock), settings)
        .context("Failed to register metrics")?;

    if let Some(redis) = &config.redis {
        let client = RedisClient::new(&redis.url).context("Invalid Redis URL")?;
        state = state.with_rate_limit(Arc::new(client), redis.rate_limit_per_minute);
    } else {
        tracing::info!("No Redis configured; hold creation is not rate limited");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
