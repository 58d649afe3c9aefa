use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use charter_booking::AvailabilityReport;
use chrono::NaiveDate;
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub duration: u32,
}

/// GET /v1/vessels/{code}/availability?date=YYYY-MM-DD&duration=H
pub async fn get_availability(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityReport>, AppError> {
    let report = state
        .availability
        .slots(&code, query.date, query.duration)
        .await?;
    Ok(Json(report))
}

/// GET /v1/vessels/{code}/availability/stream
///
/// Pushes `held`, `confirmed` and `released` events for the vessel so an
/// open calendar can refresh itself.
pub async fn stream_availability(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let vessel = state.directory.active_vessel(&code).await?;
    let vessel_id = vessel.id;
    let rx = state.slot_events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.vessel_id == vessel_id => {
                let payload = serde_json::to_string(&event).ok()?;
                Some(Ok(Event::default().event(event.kind.as_str()).data(payload)))
            }
            // Other vessels, or a lagged receiver that skipped events.
            _ => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
