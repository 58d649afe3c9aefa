use chrono::{DateTime, Utc};
use charter_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::interval::TimeRange;
use crate::vessel::PaymentModel;

/// Reservation status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Hold,
    Confirmed,
    Cancelled,
    /// Set outside this service once the charter date has passed.
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Hold => "hold",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hold" => Some(ReservationStatus::Hold),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "cancelled" => Some(ReservationStatus::Cancelled),
            "completed" => Some(ReservationStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Expired,
    Customer,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Expired => "expired",
            CancelReason::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "expired" => Some(CancelReason::Expired),
            "customer" => Some(CancelReason::Customer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    /// Human-shareable code, globally unique.
    pub code: String,
    pub vessel_id: Uuid,
    pub customer_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration_hours: u32,
    pub guest_count: u32,
    pub occasion: Option<String>,
    pub status: ReservationStatus,
    /// Only set while `status == Hold`.
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<CancelReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// `None` only for a corrupt row with `ends_at <= starts_at`.
    pub fn slot(&self) -> Option<TimeRange> {
        TimeRange::new(self.starts_at, self.ends_at)
    }

    /// A hold whose expiry is at or before `now` is no longer live.
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Hold
            && self.hold_expires_at.map_or(true, |exp| exp <= now)
    }

    pub fn is_live_hold(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Hold && !self.hold_lapsed(now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Hold,
    ConfirmedReservation,
    /// Imposed from outside (maintenance, owner use, another channel).
    External,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Hold => "hold",
            BlockType::ConfirmedReservation => "confirmed_reservation",
            BlockType::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hold" => Some(BlockType::Hold),
            "confirmed_reservation" => Some(BlockType::ConfirmedReservation),
            "external" => Some(BlockType::External),
            _ => None,
        }
    }

    /// Block types that may never overlap each other on one vessel.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, BlockType::Hold | BlockType::ConfirmedReservation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityBlock {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub reservation_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub block_type: BlockType,
    /// Who created the block (`booking`, `calendar-sync`, ...).
    pub source: String,
}

impl AvailabilityBlock {
    pub fn for_hold(reservation: &Reservation) -> Self {
        Self {
            id: Uuid::new_v4(),
            vessel_id: reservation.vessel_id,
            reservation_id: Some(reservation.id),
            starts_at: reservation.starts_at,
            ends_at: reservation.ends_at,
            block_type: BlockType::Hold,
            source: "booking".to_string(),
        }
    }

    pub fn overlaps(&self, range: &TimeRange) -> bool {
        self.starts_at < range.end() && self.ends_at > range.start()
    }
}

/// Contact details submitted with a hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerContact {
    pub email: Masked<String>,
    pub name: Option<String>,
    pub phone: Option<Masked<String>>,
}

impl CustomerContact {
    /// Identity key: trimmed, lowercased email.
    pub fn normalized_email(&self) -> String {
        self.email.expose().trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: Uuid,
    pub email: Masked<String>,
    pub name: Option<String>,
    pub phone: Option<Masked<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AddOnPaymentStatus {
    /// Upfront share awaiting checkout completion.
    Pending,
    UpfrontPaid,
    /// Never billed through the gateway.
    VendorDirect,
}

impl AddOnPaymentStatus {
    pub fn seeded_for(model: PaymentModel) -> Self {
        match model {
            PaymentModel::VendorDirect => AddOnPaymentStatus::VendorDirect,
            _ => AddOnPaymentStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddOnPaymentStatus::Pending => "pending",
            AddOnPaymentStatus::UpfrontPaid => "upfront_paid",
            AddOnPaymentStatus::VendorDirect => "vendor_direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AddOnPaymentStatus::Pending),
            "upfront_paid" => Some(AddOnPaymentStatus::UpfrontPaid),
            "vendor_direct" => Some(AddOnPaymentStatus::VendorDirect),
            _ => None,
        }
    }
}

/// A selected add-on and how its cost is split between gateway and vendor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddOnAttachment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    /// Checkout session that priced and collects this attachment.
    pub session_id: String,
    pub add_on_id: Uuid,
    pub add_on_code: String,
    pub quantity: u32,
    pub payment_model: PaymentModel,
    /// Collected through the payment session.
    pub upfront_cents: i64,
    /// Settled with the vendor outside the platform.
    pub balance_due_cents: i64,
    pub payment_status: AddOnPaymentStatus,
}

/// Result of asking the store to confirm a hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed(Reservation),
    /// Already confirmed by an earlier delivery; nothing changed.
    AlreadyConfirmed(Reservation),
    /// The hold lapsed or was cancelled before payment landed.
    Stale(Reservation),
}

impl ConfirmOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            ConfirmOutcome::Confirmed(r)
            | ConfirmOutcome::AlreadyConfirmed(r)
            | ConfirmOutcome::Stale(r) => r,
        }
    }
}

/// A hold the sweep (or a cancel) gave back to the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleasedHold {
    pub reservation_id: Uuid,
    pub vessel_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl From<&Reservation> for ReleasedHold {
    fn from(r: &Reservation) -> Self {
        Self {
            reservation_id: r.id,
            vessel_id: r.vessel_id,
            starts_at: r.starts_at,
            ends_at: r.ends_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Payment succeeded for a hold that had already lapsed or been cancelled.
    StaleConfirmation,
    /// Event referenced a reservation we do not know.
    UnknownReservation,
    /// Event referenced a payment session/intent we do not know.
    UnknownPayment,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::StaleConfirmation => "stale_confirmation",
            AnomalyKind::UnknownReservation => "unknown_reservation",
            AnomalyKind::UnknownPayment => "unknown_payment",
        }
    }
}

/// Recorded for manual review; never surfaced to the customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationAnomaly {
    pub id: Uuid,
    pub kind: AnomalyKind,
    pub event_id: String,
    pub reservation_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}
