use charter_catalog::VesselDirectory;
use charter_core::repository::ReservationStore;
use charter_core::reservation::{
    AvailabilityBlock, CancelReason, ConfirmOutcome, CustomerContact, ReleasedHold, Reservation,
    ReservationStatus,
};
use charter_core::{Clock, CoreError, CoreResult, TimeRange};
use charter_shared::{SlotEvent, SlotEventKind};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::code::reservation_code;

pub const DEFAULT_HOLD_MINUTES: i64 = 15;
pub const DEFAULT_SWEEP_BATCH: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct HoldRequest {
    pub vessel_code: String,
    pub start_time: DateTime<Utc>,
    pub duration_hours: u32,
    pub customer: CustomerContact,
    pub guest_count: u32,
    #[serde(default)]
    pub occasion: Option<String>,
}

/// Owns the `hold -> confirmed | cancelled` state machine.
pub struct ReservationManager {
    directory: VesselDirectory,
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
    sweep_batch: usize,
    events: Option<broadcast::Sender<SlotEvent>>,
}

impl ReservationManager {
    pub fn new(
        directory: VesselDirectory,
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            store,
            clock,
            hold_ttl: Duration::minutes(DEFAULT_HOLD_MINUTES),
            sweep_batch: DEFAULT_SWEEP_BATCH,
            events: None,
        }
    }

    pub fn with_hold_ttl(mut self, ttl: Duration) -> Self {
        self.hold_ttl = ttl;
        self
    }

    pub fn with_sweep_batch(mut self, batch: usize) -> Self {
        self.sweep_batch = batch.max(1);
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<SlotEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create_hold(&self, req: HoldRequest) -> CoreResult<Reservation> {
        let now = self.clock.now();

        let vessel = match self.directory.active_vessel(&req.vessel_code).await {
            Ok(v) => v,
            Err(CoreError::VesselNotFound(code)) => {
                return Err(CoreError::InvalidRequest(format!("unknown vessel {code}")))
            }
            Err(e) => return Err(e),
        };
        if req.duration_hours == 0 || !vessel.offers_duration(req.duration_hours) {
            return Err(CoreError::InvalidRequest(format!(
                "{}h is not an allowed duration for {}",
                req.duration_hours, vessel.code
            )));
        }
        if !vessel.admits_guests(req.guest_count) {
            return Err(CoreError::InvalidRequest(format!(
                "{} guests is not allowed on {}",
                req.guest_count, vessel.code
            )));
        }
        let email = req.customer.normalized_email();
        if email.is_empty() || !email.contains('@') {
            return Err(CoreError::InvalidRequest("a contact email is required".into()));
        }
        if req.start_time <= now {
            return Err(CoreError::InvalidRequest("start time must be in the future".into()));
        }
        let slot = TimeRange::from_hours(req.start_time, req.duration_hours).ok_or_else(|| {
            CoreError::InvalidRequest("charter must end after it starts".into())
        })?;

        let customer = self.store.upsert_customer(&req.customer, now).await?;
        let code = reservation_code(now, &mut rand::thread_rng());

        let reservation = Reservation {
            id: Uuid::new_v4(),
            code,
            vessel_id: vessel.id,
            customer_id: customer.id,
            starts_at: slot.start(),
            ends_at: slot.end(),
            duration_hours: req.duration_hours,
            guest_count: req.guest_count,
            occasion: req.occasion.filter(|o| !o.trim().is_empty()),
            status: ReservationStatus::Hold,
            hold_expires_at: Some(now + self.hold_ttl),
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let block = AvailabilityBlock::for_hold(&reservation);

        match self.store.insert_hold(&reservation, &block).await {
            Ok(()) => {}
            Err(CoreError::SlotUnavailable { start, .. }) => {
                info!(vessel = %vessel.code, %start, "Hold rejected, slot taken");
                return Err(CoreError::SlotUnavailable {
                    vessel: vessel.code.clone(),
                    start,
                });
            }
            Err(e) => return Err(e),
        }

        info!(
            reservation_id = %reservation.id,
            code = %reservation.code,
            vessel = %vessel.code,
            starts_at = %reservation.starts_at,
            "Hold created"
        );
        self.emit(SlotEventKind::Held, &ReleasedHold::from(&reservation));
        Ok(reservation)
    }

    /// Only called by the payment bridge after a verified payment event.
    pub async fn confirm_hold(&self, id: Uuid) -> CoreResult<ConfirmOutcome> {
        let outcome = self.store.confirm_hold(id, self.clock.now()).await?;
        if let ConfirmOutcome::Confirmed(r) = &outcome {
            info!(reservation_id = %r.id, code = %r.code, "Reservation confirmed");
            self.emit(SlotEventKind::Confirmed, &ReleasedHold::from(r));
        }
        Ok(outcome)
    }

    /// Customer-initiated release of a live hold. A lapsed hold is released
    /// as expired and reported as `HoldExpired`.
    pub async fn cancel_hold(&self, id: Uuid) -> CoreResult<Reservation> {
        self.live_hold(id).await?;

        match self.store.release_hold(id, CancelReason::Customer, self.clock.now()).await? {
            Some(released) => {
                info!(reservation_id = %id, code = %released.code, "Hold cancelled by customer");
                self.emit(SlotEventKind::Released, &ReleasedHold::from(&released));
                Ok(released)
            }
            // Confirmed or swept between the read and the write.
            None => Err(inactive_hold(&self.find(id).await?)),
        }
    }

    /// Release every lapsed hold. Idempotent; concurrent callers split the work.
    pub async fn expire_stale_holds(&self) -> CoreResult<Vec<ReleasedHold>> {
        let now = self.clock.now();
        let mut released = Vec::new();
        loop {
            let batch = self.store.expire_lapsed_holds(now, self.sweep_batch).await?;
            let done = batch.len() < self.sweep_batch;
            for hold in &batch {
                self.emit(SlotEventKind::Released, hold);
            }
            released.extend(batch);
            if done {
                break;
            }
        }
        if !released.is_empty() {
            info!(count = released.len(), "Expired stale holds");
        }
        Ok(released)
    }

    /// Lookup with lazy expiry applied.
    pub async fn reservation(&self, id: Uuid) -> CoreResult<Reservation> {
        let r = self.find(id).await?;
        self.settle_lapsed(r).await
    }

    pub async fn reservation_by_code(&self, code: &str) -> CoreResult<Reservation> {
        let r = self
            .store
            .reservation_by_code(code)
            .await?
            .ok_or_else(|| CoreError::ReservationNotFound(code.to_string()))?;
        self.settle_lapsed(r).await
    }

    /// The reservation if it is a live hold; `NotHold` / `HoldExpired` otherwise.
    pub async fn live_hold(&self, id: Uuid) -> CoreResult<Reservation> {
        let r = self.reservation(id).await?;
        match r.status {
            ReservationStatus::Hold => Ok(r),
            _ => Err(inactive_hold(&r)),
        }
    }

    async fn find(&self, id: Uuid) -> CoreResult<Reservation> {
        self.store
            .reservation(id)
            .await?
            .ok_or_else(|| CoreError::ReservationNotFound(id.to_string()))
    }

    async fn settle_lapsed(&self, r: Reservation) -> CoreResult<Reservation> {
        let now = self.clock.now();
        if !r.hold_lapsed(now) {
            return Ok(r);
        }
        match self.store.release_hold(r.id, CancelReason::Expired, now).await? {
            Some(released) => {
                warn!(reservation_id = %r.id, code = %r.code, "Hold lapsed, released on lookup");
                self.emit(SlotEventKind::Released, &ReleasedHold::from(&released));
                Ok(released)
            }
            None => self.find(r.id).await,
        }
    }

    fn emit(&self, kind: SlotEventKind, slot: &ReleasedHold) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(SlotEvent {
                vessel_id: slot.vessel_id,
                reservation_id: slot.reservation_id,
                kind,
                starts_at: slot.starts_at,
                ends_at: slot.ends_at,
                emitted_at: self.clock.now().timestamp(),
            });
        }
    }
}

fn inactive_hold(r: &Reservation) -> CoreError {
    match (r.status, r.cancel_reason) {
        (ReservationStatus::Cancelled, Some(CancelReason::Expired)) => {
            CoreError::HoldExpired(r.code.clone())
        }
        _ => not_hold(r),
    }
}

fn not_hold(r: &Reservation) -> CoreError {
    CoreError::NotHold {
        reservation: r.code.clone(),
        status: r.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter_core::repository::CatalogProvider;
    use charter_core::vessel::Vessel;
    use charter_core::ManualClock;
    use charter_shared::Masked;
    use charter_store::InMemoryStore;
    use chrono::TimeZone;

    async fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>, ReservationManager) {
        let store = Arc::new(InMemoryStore::new());
        store
            .seed_vessel(
                Vessel {
                    id: Uuid::new_v4(),
                    code: "37-AXO".into(),
                    name: "Axopar 37".into(),
                    allowed_durations: [4, 8].into_iter().collect(),
                    min_hours: None,
                    max_hours: None,
                    capacity: Some(10),
                    active: true,
                },
                None,
                None,
            )
            .await;
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2030, 5, 1, 8, 0, 0).unwrap()));
        let catalog: Arc<dyn CatalogProvider> = store.clone();
        let manager = ReservationManager::new(VesselDirectory::new(catalog), store.clone(), clock.clone());
        (store, clock, manager)
    }

    fn request(hour: u32) -> HoldRequest {
        HoldRequest {
            vessel_code: "37-AXO".into(),
            start_time: Utc.with_ymd_and_hms(2030, 6, 1, hour, 0, 0).unwrap(),
            duration_hours: 4,
            customer: CustomerContact {
                email: Masked::new("Skipper@Example.com".into()),
                name: Some("Skipper".into()),
                phone: None,
            },
            guest_count: 6,
            occasion: None,
        }
    }

    #[tokio::test]
    async fn test_hold_expires_fifteen_minutes_out() {
        let (_, clock, manager) = setup().await;
        let r = manager.create_hold(request(9)).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Hold);
        assert_eq!(r.hold_expires_at, Some(clock.now() + Duration::minutes(15)));
        assert!(r.code.starts_with("CH-"));
    }

    #[tokio::test]
    async fn test_validation_failures_are_invalid_request() {
        let (_, _, manager) = setup().await;

        let mut bad_duration = request(9);
        bad_duration.duration_hours = 6;
        let mut crowd = request(9);
        crowd.guest_count = 11;
        let mut nobody = request(9);
        nobody.guest_count = 0;
        let mut unknown = request(9);
        unknown.vessel_code = "NOPE".into();
        let mut past = request(9);
        past.start_time = Utc.with_ymd_and_hms(2030, 4, 1, 9, 0, 0).unwrap();

        for req in [bad_duration, crowd, nobody, unknown, past] {
            let err = manager.create_hold(req).await.unwrap_err();
            assert!(matches!(err, CoreError::InvalidRequest(_)), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn test_lookup_releases_lapsed_hold() {
        let (store, clock, manager) = setup().await;
        let r = manager.create_hold(request(9)).await.unwrap();

        clock.advance(Duration::minutes(15));
        let seen = manager.reservation(r.id).await.unwrap();

        assert_eq!(seen.status, ReservationStatus::Cancelled);
        assert_eq!(seen.cancel_reason, Some(CancelReason::Expired));
        assert!(store.all_blocks(r.vessel_id).await.is_empty());
        assert!(matches!(manager.live_hold(r.id).await, Err(CoreError::HoldExpired(_))));
    }

    #[tokio::test]
    async fn test_cancel_frees_the_slot() {
        let (_, _, manager) = setup().await;
        let r = manager.create_hold(request(9)).await.unwrap();

        let cancelled = manager.cancel_hold(r.id).await.unwrap();
        assert_eq!(cancelled.cancel_reason, Some(CancelReason::Customer));

        let again = manager.create_hold(request(9)).await.unwrap();
        assert_ne!(again.id, r.id);

        let err = manager.cancel_hold(r.id).await.unwrap_err();
        assert!(matches!(err, CoreError::NotHold { .. }));
    }

    #[tokio::test]
    async fn test_cancel_after_lapse_reports_expiry() {
        let (store, clock, manager) = setup().await;
        let r = manager.create_hold(request(9)).await.unwrap();

        clock.advance(Duration::minutes(20));
        let err = manager.cancel_hold(r.id).await.unwrap_err();
        assert!(matches!(err, CoreError::HoldExpired(_)), "got {err:?}");

        let stored = store.reservation(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert_eq!(stored.cancel_reason, Some(CancelReason::Expired));
        assert!(store.all_blocks(r.vessel_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (_, _, manager) = setup().await;
        let (tx, mut rx) = broadcast::channel(8);
        let manager = manager.with_events(tx);

        let r = manager.create_hold(request(9)).await.unwrap();
        manager.cancel_hold(r.id).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, SlotEventKind::Held);
        assert_eq!(rx.recv().await.unwrap().kind, SlotEventKind::Released);
    }
}
