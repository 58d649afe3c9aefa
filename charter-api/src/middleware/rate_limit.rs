use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use charter_store::redis_repo::hold_rate_key;
use serde_json::json;
use std::net::SocketAddr;

use crate::state::AppState;

const WINDOW_SECONDS: i64 = 60;

/// Fixed-window limit on hold creation per client address. Fails open when
/// Redis is unreachable.
pub async fn hold_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(limit) = &state.rate_limit else {
        return next.run(req).await;
    };
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let now = chrono::Utc::now().timestamp();
    let key = hold_rate_key(&client, now - now.rem_euclid(WINDOW_SECONDS));

    match limit.redis.check_rate_limit(&key, limit.per_minute, WINDOW_SECONDS).await {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!(%client, "Hold rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Too many hold requests, try again shortly",
                    "code": "RATE_LIMITED",
                    "retryable": true,
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Rate limiter unavailable, allowing request");
            next.run(req).await
        }
    }
}
