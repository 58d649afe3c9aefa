use charter_booking::{
    AvailabilityEngine, CheckoutBridge, CheckoutUrls, ReservationManager,
};
use charter_catalog::{PricingResolver, VesselDirectory};
use charter_core::payment::PaymentGateway;
use charter_core::repository::{CatalogProvider, ReservationStore};
use charter_core::Clock;
use charter_shared::SlotEvent;
use charter_store::RedisClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::metrics::{spawn_slot_recorder, Metrics};
use crate::middleware::resiliency::ResiliencyState;

#[derive(Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub tolerance_seconds: i64,
}

#[derive(Clone)]
pub struct RateLimit {
    pub redis: Arc<RedisClient>,
    pub per_minute: i64,
}

/// Knobs taken from `business_rules` and `payments` config.
#[derive(Clone)]
pub struct Settings {
    pub hold_minutes: i64,
    pub sweep_batch: usize,
    pub gateway_timeout: Duration,
    pub urls: CheckoutUrls,
    pub webhook: WebhookConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub directory: VesselDirectory,
    pub availability: AvailabilityEngine,
    pub manager: Arc<ReservationManager>,
    pub checkout: Arc<CheckoutBridge>,
    pub slot_events: broadcast::Sender<SlotEvent>,
    pub webhook: WebhookConfig,
    /// `None` disables throttling of hold creation.
    pub rate_limit: Option<RateLimit>,
    pub resiliency: Arc<ResiliencyState>,
    pub metrics: Metrics,
}

impl AppState {
    /// Wire the booking services together. Must run inside a Tokio runtime.
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Result<Self, prometheus::Error> {
        let (slot_events, _) = broadcast::channel(256);
        let directory = VesselDirectory::new(catalog.clone());

        let manager = Arc::new(
            ReservationManager::new(directory.clone(), store.clone(), clock)
                .with_hold_ttl(chrono::Duration::minutes(settings.hold_minutes))
                .with_sweep_batch(settings.sweep_batch)
                .with_events(slot_events.clone()),
        );
        let checkout = Arc::new(
            CheckoutBridge::new(
                manager.clone(),
                directory.clone(),
                PricingResolver::new(catalog),
                gateway,
                settings.urls,
            )
            .with_gateway_timeout(settings.gateway_timeout),
        );

        let metrics = Metrics::new()?;
        spawn_slot_recorder(metrics.clone(), slot_events.subscribe());

        Ok(Self {
            availability: AvailabilityEngine::new(directory.clone(), store),
            directory,
            manager,
            checkout,
            slot_events,
            webhook: settings.webhook,
            rate_limit: None,
            resiliency: Arc::new(ResiliencyState::default()),
            metrics,
        })
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, per_minute: i64) -> Self {
        self.rate_limit = Some(RateLimit { redis, per_minute });
        self
    }
}
