use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod availability;
pub mod checkout;
pub mod error;
pub mod holds;
pub mod metrics;
pub mod middleware;
pub mod reservations;
pub mod signature;
pub mod state;
pub mod webhooks;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let holds = Router::new()
        .route("/v1/holds", post(holds::create_hold))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::hold_rate_limit_middleware,
        ));

    let checkout = Router::new()
        .route("/v1/checkout", post(checkout::create_checkout))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::circuit_breaker_middleware,
        ));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/v1/vessels/{code}/availability", get(availability::get_availability))
        .route(
            "/v1/vessels/{code}/availability/stream",
            get(availability::stream_availability),
        )
        .route("/v1/reservations/{id}", get(reservations::get_reservation))
        .route(
            "/v1/reservations/by-code/{code}",
            get(reservations::get_reservation_by_code),
        )
        .route("/v1/reservations/{id}/cancel", post(reservations::cancel_reservation))
        .route("/v1/webhooks/payments", post(webhooks::handle_payment_webhook))
        .route("/v1/admin/holds/expire", post(admin::expire_holds))
        .merge(holds)
        .merge(checkout)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
