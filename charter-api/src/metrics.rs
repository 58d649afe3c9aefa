use axum::{extract::State, http::header, response::IntoResponse};
use charter_shared::{SlotEvent, SlotEventKind};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::AppError;
use crate::state::AppState;

/// Service counters, registered on a private registry rather than the global one
/// so tests can build as many states as they like.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub holds_created: IntCounter,
    pub holds_released: IntCounter,
    pub webhook_events: IntCounterVec,
    pub reconciliation_anomalies: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("charter".into()), None)?;

        let holds_created = IntCounter::new("holds_created_total", "Holds placed on the calendar")?;
        let holds_released = IntCounter::new(
            "holds_released_total",
            "Holds released by cancellation or expiry",
        )?;
        let webhook_events = IntCounterVec::new(
            Opts::new("webhook_events_total", "Verified payment events by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let reconciliation_anomalies = IntCounterVec::new(
            Opts::new("reconciliation_anomalies_total", "Payment events flagged for manual review"),
            &["kind"],
        )?;

        registry.register(Box::new(holds_created.clone()))?;
        registry.register(Box::new(holds_released.clone()))?;
        registry.register(Box::new(webhook_events.clone()))?;
        registry.register(Box::new(reconciliation_anomalies.clone()))?;

        Ok(Self {
            registry,
            holds_created,
            holds_released,
            webhook_events,
            reconciliation_anomalies,
        })
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Count hold transitions off the slot-event channel, so releases from lazy
/// expiry are seen as well as those from the sweep and explicit cancels.
pub fn spawn_slot_recorder(metrics: Metrics, mut rx: broadcast::Receiver<SlotEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.kind {
                    SlotEventKind::Held => metrics.holds_created.inc(),
                    SlotEventKind::Released => metrics.holds_released.inc(),
                    SlotEventKind::Confirmed => {}
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Metrics recorder lagged behind slot events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::Core(charter_core::CoreError::Internal(format!("metrics: {e}"))))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render_with_prefix() {
        let metrics = Metrics::new().unwrap();
        metrics.holds_created.inc();
        metrics
            .webhook_events
            .with_label_values(&["checkout_completed", "applied"])
            .inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("charter_holds_created_total 1"));
        assert!(text.contains(r#"charter_webhook_events_total{kind="checkout_completed",outcome="applied"} 1"#));
    }
}
