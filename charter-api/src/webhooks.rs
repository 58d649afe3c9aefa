use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use charter_booking::ReconcileOutcome;
use charter_store::stripe::decode_event;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::signature;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /v1/webhooks/payments
///
/// Anything past signature verification answers 2xx unless the store is
/// down, so the gateway only retries what can actually succeed later.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing signature".into()))?;
    let now = state.manager.now().timestamp();
    signature::verify(
        header,
        &body,
        &state.webhook.secret,
        state.webhook.tolerance_seconds,
        now,
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Rejected payment webhook");
        AppError::Unauthorized(e.to_string())
    })?;

    let Some(event) = decode_event(&body)? else {
        return Ok((StatusCode::OK, Json(json!({ "received": true, "ignored": true }))));
    };
    tracing::info!(event_id = event.event_id(), kind = event.kind(), "Received payment event");

    let outcome = state.checkout.reconcile(&event).await?;
    state
        .metrics
        .webhook_events
        .with_label_values(&[event.kind(), outcome.as_str()])
        .inc();
    if let ReconcileOutcome::Anomaly(kind) = outcome {
        state
            .metrics
            .reconciliation_anomalies
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    Ok((
        StatusCode::OK,
        Json(json!({ "received": true, "outcome": outcome.as_str() })),
    ))
}
