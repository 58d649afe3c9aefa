pub mod clock;
pub mod interval;
pub mod vessel;
pub mod reservation;
pub mod payment;
pub mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use interval::TimeRange;

use chrono::{DateTime, Utc};

/// Coarse classification used by callers to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; never retried, the user must correct it.
    Validation,
    NotFound,
    /// Slot taken or reservation in the wrong state.
    Conflict,
    /// Hold lapsed; the client must start over.
    Expired,
    /// Catalog store or payment gateway failed; retryable with backoff.
    Upstream,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Vessel not found or inactive: {0}")]
    VesselNotFound(String),
    #[error("Duration of {hours}h is not offered for vessel {vessel}")]
    InvalidDuration { vessel: String, hours: u32 },
    #[error("No schedule configured for vessel {0}")]
    ScheduleNotConfigured(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Slot starting {start} is no longer available for vessel {vessel}")]
    SlotUnavailable { vessel: String, start: DateTime<Utc> },
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),
    #[error("Add-on not found: {0}")]
    AddOnNotFound(String),
    #[error("Reservation {reservation} is {status}, not a hold")]
    NotHold { reservation: String, status: String },
    #[error("Hold expired for reservation {0}")]
    HoldExpired(String),
    #[error("No rate configured for vessel {vessel} at {hours}h")]
    PricingUnavailable { vessel: String, hours: u32 },
    #[error("Upstream service error: {0}")]
    Upstream(String),
    #[error("Internal service error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidDuration { .. }
            | CoreError::InvalidRequest(_)
            | CoreError::ScheduleNotConfigured(_)
            | CoreError::PricingUnavailable { .. } => ErrorKind::Validation,
            CoreError::VesselNotFound(_)
            | CoreError::ReservationNotFound(_)
            | CoreError::AddOnNotFound(_) => ErrorKind::NotFound,
            CoreError::SlotUnavailable { .. } | CoreError::NotHold { .. } => ErrorKind::Conflict,
            CoreError::HoldExpired(_) => ErrorKind::Expired,
            CoreError::Upstream(_) => ErrorKind::Upstream,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::VesselNotFound(_) => "VESSEL_NOT_FOUND",
            CoreError::InvalidDuration { .. } => "INVALID_DURATION",
            CoreError::ScheduleNotConfigured(_) => "SCHEDULE_NOT_CONFIGURED",
            CoreError::InvalidRequest(_) => "INVALID_REQUEST",
            CoreError::SlotUnavailable { .. } => "SLOT_UNAVAILABLE",
            CoreError::ReservationNotFound(_) => "NOT_FOUND",
            CoreError::AddOnNotFound(_) => "ADD_ON_NOT_FOUND",
            CoreError::NotHold { .. } => "NOT_HOLD",
            CoreError::HoldExpired(_) => "HOLD_EXPIRED",
            CoreError::PricingUnavailable { .. } => "PRICING_UNAVAILABLE",
            CoreError::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Upstream
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
