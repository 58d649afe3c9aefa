use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Failing fast until the reset timeout elapses.
    Open,
    /// One probe request is in flight.
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failures: usize,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    pub name: String,
    failure_threshold: usize,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Whether a request may go through now.
    pub async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(breaker = %self.name, "Circuit half-open, probing");
                }
                cooled
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures += 1;
        if inner.state == CircuitState::HalfOpen || inner.failures >= self.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::error!(breaker = %self.name, failures = inner.failures, "Circuit opened");
        }
    }
}

pub struct ResiliencyState {
    pub checkout_cb: CircuitBreaker,
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self {
            checkout_cb: CircuitBreaker::new("payment-gateway", 5, Duration::from_secs(30)),
        }
    }
}

/// Guards the checkout route. Only 5xx responses count as failures; a
/// rejected hold or a bad add-on code says nothing about the gateway.
pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let cb = &state.resiliency.checkout_cb;
    if !cb.try_acquire().await {
        return AppError::Unavailable(format!("circuit {} is open", cb.name)).into_response();
    }

    let response = next.run(req).await;
    if response.status().is_server_error() {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }
    response
}
