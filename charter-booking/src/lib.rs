pub mod availability;
pub mod code;
pub mod manager;
pub mod orchestrator;

pub use availability::{AvailabilityEngine, AvailabilityReport, SlotAvailability};
pub use manager::{HoldRequest, ReservationManager};
pub use orchestrator::{
    AddOnSelection, CheckoutBridge, CheckoutOutcome, CheckoutUrls, MockPaymentGateway,
    ReconcileOutcome,
};
