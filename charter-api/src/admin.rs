use axum::{extract::State, Json};
use charter_core::reservation::ReleasedHold;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub released: usize,
    pub holds: Vec<ReleasedHold>,
}

/// POST /v1/admin/holds/expire
///
/// Called by the external scheduler. Safe to run from several schedulers at once.
pub async fn expire_holds(State(state): State<AppState>) -> Result<Json<ExpireResponse>, AppError> {
    let holds = state.manager.expire_stale_holds().await?;
    Ok(Json(ExpireResponse {
        released: holds.len(),
        holds,
    }))
}
