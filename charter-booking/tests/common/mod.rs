#![allow(dead_code)]

use charter_booking::{
    AvailabilityEngine, CheckoutBridge, CheckoutUrls, HoldRequest, MockPaymentGateway,
    ReservationManager,
};
use charter_catalog::{PricingResolver, VesselDirectory};
use charter_core::repository::CatalogProvider;
use charter_core::reservation::CustomerContact;
use charter_core::vessel::{PricingRule, ScheduleMode, ScheduleRule, Vessel};
use charter_core::ManualClock;
use charter_shared::Masked;
use charter_store::InMemoryStore;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const VESSEL: &str = "37-AXO";
pub const FOUR_HOUR_RATE: i64 = 120_000;

pub struct World {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<MockPaymentGateway>,
    pub vessel_id: Uuid,
    pub availability: AvailabilityEngine,
    pub manager: Arc<ReservationManager>,
    pub bridge: CheckoutBridge,
}

/// 37-AXO in UTC, fixed departures at 09:00 and 13:00, priced for 4h only.
pub async fn world() -> World {
    let store = Arc::new(InMemoryStore::new());
    let vessel_id = Uuid::new_v4();
    store
        .seed_vessel(
            Vessel {
                id: vessel_id,
                code: VESSEL.into(),
                name: "Axopar 37".into(),
                allowed_durations: [4, 8].into_iter().collect(),
                min_hours: None,
                max_hours: None,
                capacity: Some(10),
                active: true,
            },
            Some(ScheduleRule {
                vessel_id,
                timezone: chrono_tz::UTC,
                mode: ScheduleMode::Fixed {
                    start_times: vec![
                        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
                    ],
                },
            }),
            Some(PricingRule {
                vessel_id,
                currency: "usd".into(),
                base_rates: BTreeMap::from([(4, FOUR_HOUR_RATE)]),
                extra_hour_cents: Some(25_000),
                deposit_policy: serde_json::Value::Null,
            }),
        )
        .await;

    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2030, 5, 1, 8, 0, 0).unwrap()));
    let catalog: Arc<dyn CatalogProvider> = store.clone();
    let directory = VesselDirectory::new(catalog.clone());
    let manager = Arc::new(ReservationManager::new(directory.clone(), store.clone(), clock.clone()));
    let gateway = Arc::new(MockPaymentGateway::new());
    let bridge = CheckoutBridge::new(
        manager.clone(),
        directory.clone(),
        PricingResolver::new(catalog),
        gateway.clone(),
        CheckoutUrls {
            success_url: "https://charter.test/booked/{RESERVATION_CODE}".into(),
            cancel_url: "https://charter.test/cancelled".into(),
        },
    );

    World {
        availability: AvailabilityEngine::new(directory, store.clone()),
        store,
        clock,
        gateway,
        vessel_id,
        manager,
        bridge,
    }
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, hour, 0, 0).unwrap()
}

pub fn hold_request(start: DateTime<Utc>, hours: u32, email: &str) -> HoldRequest {
    HoldRequest {
        vessel_code: VESSEL.into(),
        start_time: start,
        duration_hours: hours,
        customer: CustomerContact {
            email: Masked::new(email.into()),
            name: Some("Guest".into()),
            phone: None,
        },
        guest_count: 6,
        occasion: None,
    }
}
