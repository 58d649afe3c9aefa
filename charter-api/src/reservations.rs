use axum::{
    extract::{Path, State},
    Json,
};
use charter_core::reservation::{AddOnAttachment, CancelReason, Reservation, ReservationStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub code: String,
    pub vessel_code: String,
    pub status: ReservationStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: u32,
    pub guest_count: u32,
    pub occasion: Option<String>,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<CancelReason>,
    pub add_ons: Vec<AddOnAttachment>,
}

async fn render(state: &AppState, r: Reservation) -> Result<ReservationResponse, AppError> {
    let vessel = state.directory.vessel_by_id(r.vessel_id).await?;
    let add_ons = state.checkout.add_ons(r.id).await?;
    Ok(ReservationResponse {
        id: r.id,
        code: r.code,
        vessel_code: vessel.code,
        status: r.status,
        start_time: r.starts_at,
        end_time: r.ends_at,
        duration_hours: r.duration_hours,
        guest_count: r.guest_count,
        occasion: r.occasion,
        hold_expires_at: r.hold_expires_at,
        cancel_reason: r.cancel_reason,
        add_ons,
    })
}

/// GET /v1/reservations/{id}
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let r = state.manager.reservation(id).await?;
    Ok(Json(render(&state, r).await?))
}

/// GET /v1/reservations/by-code/{code}
///
/// Polled by the checkout success page until the webhook lands.
pub async fn get_reservation_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ReservationResponse>, AppError> {
    let r = state.manager.reservation_by_code(&code).await?;
    Ok(Json(render(&state, r).await?))
}

/// POST /v1/reservations/{id}/cancel
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let r = state.manager.cancel_hold(id).await?;
    Ok(Json(render(&state, r).await?))
}
