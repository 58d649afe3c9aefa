use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use charter_api::signature::sign;
use charter_api::state::{AppState, Settings, WebhookConfig};
use charter_api::{app, webhooks::SIGNATURE_HEADER};
use charter_booking::{CheckoutUrls, MockPaymentGateway};
use charter_core::repository::CatalogProvider;
use charter_core::vessel::{PricingRule, ScheduleMode, ScheduleRule, Vessel};
use charter_core::ManualClock;
use charter_store::InMemoryStore;
use chrono::{Duration, NaiveTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "whsec_api_test";

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    gateway: Arc<MockPaymentGateway>,
}

async fn test_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let vessel_id = Uuid::new_v4();
    store
        .seed_vessel(
            Vessel {
                id: vessel_id,
                code: "37-AXO".into(),
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
                base_rates: BTreeMap::from([(4, 120_000), (8, 210_000)]),
                extra_hour_cents: None,
                deposit_policy: Value::Null,
            }),
        )
        .await;

    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2030, 5, 1, 8, 0, 0).unwrap()));
    let gateway = Arc::new(MockPaymentGateway::new());
    let catalog: Arc<dyn CatalogProvider> = store.clone();
    let state = AppState::new(
        catalog,
        store,
        gateway.clone(),
        clock.clone(),
        Settings {
            hold_minutes: 15,
            sweep_batch: 100,
            gateway_timeout: std::time::Duration::from_secs(2),
            urls: CheckoutUrls {
                success_url: "https://charter.test/ok/{RESERVATION_CODE}".into(),
                cancel_url: "https://charter.test/cancel".into(),
            },
            webhook: WebhookConfig {
                secret: SECRET.into(),
                tolerance_seconds: 300,
            },
        },
    )
    .unwrap();

    TestApp {
        router: app(state),
        clock,
        gateway,
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn signed_webhook(app: &TestApp, payload: &Value) -> Request<Body> {
    let body = payload.to_string();
    let header = sign(body.as_bytes(), SECRET, app.clock_now());
    Request::builder()
        .method("POST")
        .uri("/v1/webhooks/payments")
        .header(SIGNATURE_HEADER, header)
        .body(Body::from(body))
        .unwrap()
}

impl TestApp {
    fn clock_now(&self) -> i64 {
        use charter_core::Clock;
        self.clock.now().timestamp()
    }
}

fn hold_body(start: &str) -> Value {
    json!({
        "vessel_code": "37-AXO",
        "start_time": start,
        "duration_hours": 4,
        "customer": { "email": "ana@example.com", "name": "Ana", "phone": null },
        "guest_count": 6
    })
}

#[tokio::test]
async fn test_availability_hold_checkout_webhook() {
    let app = test_app().await;

    let (status, body) = send(&app, get("/v1/vessels/37-AXO/availability?date=2030-06-01&duration=4")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slots"].as_array().unwrap().len(), 2);

    let (status, hold) = send(&app, post_json("/v1/holds", hold_body("2030-06-01T09:00:00Z"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hold["status"], "hold");
    let reservation_id = hold["reservation_id"].as_str().unwrap().to_string();
    let code = hold["reservation_code"].as_str().unwrap().to_string();

    let (_, body) = send(&app, get("/v1/vessels/37-AXO/availability?date=2030-06-01&duration=4")).await;
    assert_eq!(body["slots"][0]["available"], false);
    assert_eq!(body["slots"][1]["available"], true);

    let (status, checkout) = send(
        &app,
        post_json("/v1/checkout", json!({ "reservation_id": reservation_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checkout["amount_cents"], 120_000);
    let session_id = checkout["session_id"].as_str().unwrap().to_string();

    let event = json!({
        "id": "evt_api_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_intent": "pi_api_1",
            "metadata": { "reservation_id": reservation_id }
        }}
    });
    let (status, body) = send(&app, signed_webhook(&app, &event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");

    let (_, body) = send(&app, signed_webhook(&app, &event)).await;
    assert_eq!(body["outcome"], "duplicate");

    let (status, reservation) = send(&app, get(&format!("/v1/reservations/by-code/{code}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reservation["status"], "confirmed");
    assert_eq!(reservation["vessel_code"], "37-AXO");

    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    let text = String::from_utf8(response.into_body().collect().await.unwrap().to_bytes().to_vec()).unwrap();
    assert!(text.contains(r#"outcome="duplicate""#));
}

#[tokio::test]
async fn test_error_statuses() {
    let app = test_app().await;

    let (status, body) = send(&app, get("/v1/vessels/NOPE/availability?date=2030-06-01&duration=4")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "VESSEL_NOT_FOUND");

    let (status, body) = send(&app, get("/v1/vessels/37-AXO/availability?date=2030-06-01&duration=6")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_DURATION");

    send(&app, post_json("/v1/holds", hold_body("2030-06-01T13:00:00Z"))).await;
    let (status, body) = send(&app, post_json("/v1/holds", hold_body("2030-06-01T14:00:00Z"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SLOT_UNAVAILABLE");
    assert_eq!(body["retryable"], false);

    let (status, _) = send(&app, get(&format!("/v1/reservations/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_hold_checkout_is_gone() {
    let app = test_app().await;
    let (_, hold) = send(&app, post_json("/v1/holds", hold_body("2030-06-01T09:00:00Z"))).await;
    app.clock.advance(Duration::minutes(16));

    let (status, body) = send(
        &app,
        post_json("/v1/checkout", json!({ "reservation_id": hold["reservation_id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "HOLD_EXPIRED");

    let (status, body) = send(&app, post_json("/v1/admin/holds/expire", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    // The checkout lookup already released it lazily.
    assert_eq!(body["released"], 0);
}

#[tokio::test]
async fn test_gateway_outage_is_retryable_and_trips_breaker() {
    let app = test_app().await;
    app.gateway.set_failing(true);
    let (_, hold) = send(&app, post_json("/v1/holds", hold_body("2030-06-01T09:00:00Z"))).await;
    let checkout = json!({ "reservation_id": hold["reservation_id"] });

    for _ in 0..5 {
        let (status, body) = send(&app, post_json("/v1/checkout", checkout.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["retryable"], true);
    }
    app.gateway.set_failing(false);

    // Open circuit fails fast without reaching the gateway.
    let (status, body) = send(&app, post_json("/v1/checkout", checkout)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");
    assert!(app.gateway.requests().is_empty());
}

#[tokio::test]
async fn test_webhook_signature_is_enforced() {
    let app = test_app().await;
    let payload = json!({ "id": "evt_x", "type": "checkout.session.completed", "data": { "object": { "id": "cs_x" } } });

    let unsigned = post_json("/v1/webhooks/payments", payload.clone());
    let (status, _) = send(&app, unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/payments")
        .header(SIGNATURE_HEADER, sign(payload.to_string().as_bytes(), "whsec_wrong", app.clock_now()))
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    let ignored = json!({ "id": "evt_y", "type": "charge.refunded", "data": { "object": { "id": "ch_1" } } });
    let (status, body) = send(&app, signed_webhook(&app, &ignored)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ignored"], true);
}

#[tokio::test]
async fn test_cancel_frees_the_slot() {
    let app = test_app().await;
    let (_, hold) = send(&app, post_json("/v1/holds", hold_body("2030-06-01T09:00:00Z"))).await;
    let id = hold["reservation_id"].as_str().unwrap();

    let (status, body) = send(&app, post_json(&format!("/v1/reservations/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancel_reason"], "customer");

    let (status, _) = send(&app, post_json(&format!("/v1/reservations/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, post_json("/v1/holds", hold_body("2030-06-01T09:00:00Z"))).await;
    assert_eq!(status, StatusCode::CREATED);
}
