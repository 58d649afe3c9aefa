use axum::{extract::State, http::StatusCode, Json};
use charter_booking::HoldRequest;
use charter_core::reservation::ReservationStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HoldResponse {
    pub reservation_id: Uuid,
    pub reservation_code: String,
    pub status: ReservationStatus,
    pub vessel_code: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

/// POST /v1/holds
pub async fn create_hold(
    State(state): State<AppState>,
    Json(req): Json<HoldRequest>,
) -> Result<(StatusCode, Json<HoldResponse>), AppError> {
    let vessel_code = req.vessel_code.clone();
    let hold = state.manager.create_hold(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(HoldResponse {
            reservation_id: hold.id,
            reservation_code: hold.code,
            status: hold.status,
            vessel_code,
            start_time: hold.starts_at,
            end_time: hold.ends_at,
            hold_expires_at: hold.hold_expires_at,
        }),
    ))
}
