use axum::{extract::State, Json};
use charter_booking::{AddOnSelection, CheckoutOutcome};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub reservation_id: Uuid,
    #[serde(default)]
    pub add_ons: Vec<AddOnSelection>,
}

/// POST /v1/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutOutcome>, AppError> {
    let outcome = state
        .checkout
        .create_checkout_session(req.reservation_id, &req.add_ons)
        .await?;
    Ok(Json(outcome))
}
