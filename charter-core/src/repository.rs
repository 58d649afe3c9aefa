use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::interval::TimeRange;
use crate::payment::{Payment, PaymentStatus};
use crate::reservation::{
    AddOnAttachment, AvailabilityBlock, CancelReason, ConfirmOutcome, Customer, CustomerContact,
    ReconciliationAnomaly, ReleasedHold, Reservation,
};
use crate::vessel::{AddOn, PricingRule, ScheduleRule, Vessel};
use crate::CoreResult;

/// Read-only view of the vessel catalog (vessels, schedules, rates, add-ons).
///
/// Implementations may be eventually consistent with the upstream catalog.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn vessel_by_code(&self, code: &str) -> CoreResult<Option<Vessel>>;

    async fn vessel_by_id(&self, id: Uuid) -> CoreResult<Option<Vessel>>;

    async fn schedule_rule(&self, vessel_id: Uuid) -> CoreResult<Option<ScheduleRule>>;

    async fn pricing_rule(&self, vessel_id: Uuid) -> CoreResult<Option<PricingRule>>;

    async fn add_on_by_code(&self, code: &str) -> CoreResult<Option<AddOn>>;
}

/// Durable reservation state shared by every handler instance.
///
/// Methods documented as atomic must read and write inside one transaction
/// (or under one lock); the lifecycle manager relies on it for correctness.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Every block of any type on `vessel_id` that overlaps `window`.
    async fn blocks_overlapping(
        &self,
        vessel_id: Uuid,
        window: TimeRange,
    ) -> CoreResult<Vec<AvailabilityBlock>>;

    /// Create or update by normalized email; never forks identity.
    async fn upsert_customer(
        &self,
        contact: &CustomerContact,
        now: DateTime<Utc>,
    ) -> CoreResult<Customer>;

    async fn customer(&self, id: Uuid) -> CoreResult<Option<Customer>>;

    /// Atomic: re-check for overlapping `hold`/`confirmed_reservation` blocks,
    /// then insert the reservation and its block together.
    /// Fails with `SlotUnavailable` when the interval is taken.
    async fn insert_hold(
        &self,
        reservation: &Reservation,
        block: &AvailabilityBlock,
    ) -> CoreResult<()>;

    async fn reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    async fn reservation_by_code(&self, code: &str) -> CoreResult<Option<Reservation>>;

    /// Atomic: confirm a live hold and flip its block to
    /// `confirmed_reservation`. Lapsed or cancelled holds come back as
    /// `ConfirmOutcome::Stale` untouched.
    async fn confirm_hold(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<ConfirmOutcome>;

    /// Atomic: cancel a hold and delete its block.
    ///
    /// With `CancelReason::Expired` the hold is only released when it has
    /// lapsed at `now`. Returns `None` when nothing was released.
    async fn release_hold(
        &self,
        id: Uuid,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Reservation>>;

    /// Release up to `limit` lapsed holds. Safe to run concurrently.
    async fn expire_lapsed_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> CoreResult<Vec<ReleasedHold>>;

    /// Replace the attachments recorded for one checkout session. Other
    /// sessions of the same reservation keep theirs.
    async fn attach_add_ons(
        &self,
        session_id: &str,
        attachments: &[AddOnAttachment],
    ) -> CoreResult<()>;

    /// Attachments across every checkout session of the reservation.
    async fn add_ons(&self, reservation_id: Uuid) -> CoreResult<Vec<AddOnAttachment>>;

    async fn session_add_ons(&self, session_id: &str) -> CoreResult<Vec<AddOnAttachment>>;

    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()>;

    async fn payment_by_session(&self, session_id: &str) -> CoreResult<Option<Payment>>;

    async fn payments_for(&self, reservation_id: Uuid) -> CoreResult<Vec<Payment>>;

    /// Mark the session's payment succeeded, recording the intent id if given,
    /// and mark that session's pending attachments upfront-paid.
    async fn settle_payment_session(
        &self,
        session_id: &str,
        payment_intent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Payment>>;

    /// Update a payment by intent id. When no payment carries the intent yet,
    /// the newest pending attempt of `fallback_reservation` adopts it.
    /// `Failed` never overwrites `Succeeded`.
    async fn update_payment_by_intent(
        &self,
        payment_intent_id: &str,
        fallback_reservation: Option<Uuid>,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Payment>>;

    async fn event_processed(&self, event_id: &str) -> CoreResult<bool>;

    /// Idempotent insert into the processed-event ledger.
    async fn mark_event_processed(
        &self,
        event_id: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()>;

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> CoreResult<()>;

    async fn anomalies(&self, limit: usize) -> CoreResult<Vec<ReconciliationAnomaly>>;
}
