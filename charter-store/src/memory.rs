use async_trait::async_trait;
use charter_core::payment::{Payment, PaymentStatus};
use charter_core::repository::{CatalogProvider, ReservationStore};
use charter_core::reservation::{
    AddOnAttachment, AddOnPaymentStatus, AvailabilityBlock, BlockType, CancelReason,
    ConfirmOutcome, Customer, CustomerContact, ReconciliationAnomaly, ReleasedHold, Reservation,
    ReservationStatus,
};
use charter_core::vessel::{AddOn, PricingRule, ScheduleRule, Vessel};
use charter_core::{CoreError, CoreResult, TimeRange};
use charter_shared::Masked;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    vessels: HashMap<Uuid, Vessel>,
    schedules: HashMap<Uuid, ScheduleRule>,
    pricing: HashMap<Uuid, PricingRule>,
    add_ons: HashMap<String, AddOn>,
    /// Keyed by normalized email.
    customers: HashMap<String, Customer>,
    reservations: HashMap<Uuid, Reservation>,
    blocks: Vec<AvailabilityBlock>,
    attachments: Vec<AddOnAttachment>,
    payments: Vec<Payment>,
    processed_events: HashMap<String, String>,
    anomalies: Vec<ReconciliationAnomaly>,
}

impl State {
    fn release(&mut self, id: Uuid, reason: CancelReason, now: DateTime<Utc>) -> Option<Reservation> {
        let reservation = self.reservations.get_mut(&id)?;
        reservation.status = ReservationStatus::Cancelled;
        reservation.cancel_reason = Some(reason);
        reservation.hold_expires_at = None;
        reservation.updated_at = now;
        let released = reservation.clone();
        self.blocks.retain(|b| b.reservation_id != Some(id));
        Some(released)
    }
}

/// Process-local store with the same atomicity as the Postgres one: every
/// operation runs under a single lock.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_vessel(
        &self,
        vessel: Vessel,
        schedule: Option<ScheduleRule>,
        pricing: Option<PricingRule>,
    ) {
        let mut state = self.state.lock().await;
        if let Some(rule) = schedule {
            state.schedules.insert(vessel.id, rule);
        }
        if let Some(rule) = pricing {
            state.pricing.insert(vessel.id, rule);
        }
        state.vessels.insert(vessel.id, vessel);
    }

    pub async fn seed_add_on(&self, add_on: AddOn) {
        self.state.lock().await.add_ons.insert(add_on.code.clone(), add_on);
    }

    /// Blocks of any type are accepted here; external blocks may overlap holds.
    pub async fn insert_block(&self, block: AvailabilityBlock) {
        self.state.lock().await.blocks.push(block);
    }

    pub async fn all_blocks(&self, vessel_id: Uuid) -> Vec<AvailabilityBlock> {
        let state = self.state.lock().await;
        let mut blocks: Vec<_> = state
            .blocks
            .iter()
            .filter(|b| b.vessel_id == vessel_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.starts_at);
        blocks
    }
}

#[async_trait]
impl CatalogProvider for InMemoryStore {
    async fn vessel_by_code(&self, code: &str) -> CoreResult<Option<Vessel>> {
        let state = self.state.lock().await;
        Ok(state.vessels.values().find(|v| v.code == code).cloned())
    }

    async fn vessel_by_id(&self, id: Uuid) -> CoreResult<Option<Vessel>> {
        Ok(self.state.lock().await.vessels.get(&id).cloned())
    }

    async fn schedule_rule(&self, vessel_id: Uuid) -> CoreResult<Option<ScheduleRule>> {
        Ok(self.state.lock().await.schedules.get(&vessel_id).cloned())
    }

    async fn pricing_rule(&self, vessel_id: Uuid) -> CoreResult<Option<PricingRule>> {
        Ok(self.state.lock().await.pricing.get(&vessel_id).cloned())
    }

    async fn add_on_by_code(&self, code: &str) -> CoreResult<Option<AddOn>> {
        Ok(self.state.lock().await.add_ons.get(code).cloned())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn blocks_overlapping(
        &self,
        vessel_id: Uuid,
        window: TimeRange,
    ) -> CoreResult<Vec<AvailabilityBlock>> {
        let state = self.state.lock().await;
        let mut blocks: Vec<_> = state
            .blocks
            .iter()
            .filter(|b| b.vessel_id == vessel_id && b.overlaps(&window))
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.starts_at);
        Ok(blocks)
    }

    async fn upsert_customer(
        &self,
        contact: &CustomerContact,
        now: DateTime<Utc>,
    ) -> CoreResult<Customer> {
        let email = contact.normalized_email();
        let mut state = self.state.lock().await;
        let customer = state
            .customers
            .entry(email.clone())
            .and_modify(|c| {
                if contact.name.is_some() {
                    c.name = contact.name.clone();
                }
                if contact.phone.is_some() {
                    c.phone = contact.phone.clone();
                }
                c.updated_at = now;
            })
            .or_insert_with(|| Customer {
                id: Uuid::new_v4(),
                email: Masked::new(email),
                name: contact.name.clone(),
                phone: contact.phone.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(customer.clone())
    }

    async fn customer(&self, id: Uuid) -> CoreResult<Option<Customer>> {
        let state = self.state.lock().await;
        Ok(state.customers.values().find(|c| c.id == id).cloned())
    }

    async fn insert_hold(
        &self,
        reservation: &Reservation,
        block: &AvailabilityBlock,
    ) -> CoreResult<()> {
        let slot = reservation.slot().ok_or_else(|| {
            CoreError::InvalidRequest("reservation must end after it starts".into())
        })?;
        let mut state = self.state.lock().await;

        let taken = state.blocks.iter().any(|b| {
            b.vessel_id == reservation.vessel_id && b.block_type.is_exclusive() && b.overlaps(&slot)
        });
        if taken {
            return Err(CoreError::SlotUnavailable {
                vessel: reservation.vessel_id.to_string(),
                start: reservation.starts_at,
            });
        }
        if state.reservations.values().any(|r| r.code == reservation.code) {
            return Err(CoreError::Internal(format!(
                "reservation code collision: {}",
                reservation.code
            )));
        }

        state.reservations.insert(reservation.id, reservation.clone());
        state.blocks.push(block.clone());
        Ok(())
    }

    async fn reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn reservation_by_code(&self, code: &str) -> CoreResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.reservations.values().find(|r| r.code == code).cloned())
    }

    async fn confirm_hold(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<ConfirmOutcome> {
        let mut state = self.state.lock().await;
        let current = state
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::ReservationNotFound(id.to_string()))?;

        match current.status {
            ReservationStatus::Confirmed | ReservationStatus::Completed => {
                return Ok(ConfirmOutcome::AlreadyConfirmed(current))
            }
            ReservationStatus::Hold if current.is_live_hold(now) => {}
            _ => return Ok(ConfirmOutcome::Stale(current)),
        }

        let mut confirmed = current;
        confirmed.status = ReservationStatus::Confirmed;
        confirmed.hold_expires_at = None;
        confirmed.updated_at = now;
        state.reservations.insert(id, confirmed.clone());

        for block in state.blocks.iter_mut().filter(|b| b.reservation_id == Some(id)) {
            block.block_type = BlockType::ConfirmedReservation;
        }
        Ok(ConfirmOutcome::Confirmed(confirmed))
    }

    async fn release_hold(
        &self,
        id: Uuid,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Reservation>> {
        let mut state = self.state.lock().await;
        let eligible = match state.reservations.get(&id) {
            Some(r) if r.status == ReservationStatus::Hold => {
                reason != CancelReason::Expired || r.hold_lapsed(now)
            }
            _ => false,
        };
        if !eligible {
            return Ok(None);
        }
        Ok(state.release(id, reason, now))
    }

    async fn expire_lapsed_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> CoreResult<Vec<ReleasedHold>> {
        let mut state = self.state.lock().await;
        let mut lapsed: Vec<(Option<DateTime<Utc>>, Uuid)> = state
            .reservations
            .values()
            .filter(|r| r.hold_lapsed(now))
            .map(|r| (r.hold_expires_at, r.id))
            .collect();
        lapsed.sort();
        lapsed.truncate(limit);

        Ok(lapsed
            .into_iter()
            .filter_map(|(_, id)| state.release(id, CancelReason::Expired, now))
            .map(|r| ReleasedHold::from(&r))
            .collect())
    }

    async fn attach_add_ons(
        &self,
        session_id: &str,
        attachments: &[AddOnAttachment],
    ) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state.attachments.retain(|a| a.session_id != session_id);
        state.attachments.extend(attachments.iter().cloned());
        Ok(())
    }

    async fn add_ons(&self, reservation_id: Uuid) -> CoreResult<Vec<AddOnAttachment>> {
        let state = self.state.lock().await;
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn session_add_ons(&self, session_id: &str) -> CoreResult<Vec<AddOnAttachment>> {
        let state = self.state.lock().await;
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        if state.payments.iter().any(|p| p.session_id == payment.session_id) {
            return Err(CoreError::Internal(format!(
                "duplicate payment session {}",
                payment.session_id
            )));
        }
        state.payments.push(payment.clone());
        Ok(())
    }

    async fn payment_by_session(&self, session_id: &str) -> CoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.iter().find(|p| p.session_id == session_id).cloned())
    }

    async fn payments_for(&self, reservation_id: Uuid) -> CoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn settle_payment_session(
        &self,
        session_id: &str,
        payment_intent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        let Some(payment) = state.payments.iter_mut().find(|p| p.session_id == session_id) else {
            return Ok(None);
        };
        payment.status = PaymentStatus::Succeeded;
        if payment.payment_intent_id.is_none() {
            payment.payment_intent_id = payment_intent_id.map(str::to_string);
        }
        payment.updated_at = now;
        let settled = payment.clone();

        for a in state.attachments.iter_mut().filter(|a| {
            a.session_id == session_id && a.payment_status == AddOnPaymentStatus::Pending
        }) {
            a.payment_status = AddOnPaymentStatus::UpfrontPaid;
        }
        Ok(Some(settled))
    }

    async fn update_payment_by_intent(
        &self,
        payment_intent_id: &str,
        fallback_reservation: Option<Uuid>,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Payment>> {
        let mut state = self.state.lock().await;

        let by_intent = state
            .payments
            .iter()
            .position(|p| p.payment_intent_id.as_deref() == Some(payment_intent_id));
        let index = by_intent.or_else(|| {
            let reservation_id = fallback_reservation?;
            state
                .payments
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    p.reservation_id == reservation_id
                        && p.payment_intent_id.is_none()
                        && p.status == PaymentStatus::Pending
                })
                .max_by_key(|(_, p)| p.created_at)
                .map(|(i, _)| i)
        });
        let Some(index) = index else {
            return Ok(None);
        };

        let payment = &mut state.payments[index];
        if payment.payment_intent_id.is_none() {
            payment.payment_intent_id = Some(payment_intent_id.to_string());
            payment.updated_at = now;
        }
        let next = payment.status.after_event(status);
        if next != payment.status {
            payment.status = next;
            payment.updated_at = now;
        }
        Ok(Some(payment.clone()))
    }

    async fn event_processed(&self, event_id: &str) -> CoreResult<bool> {
        Ok(self.state.lock().await.processed_events.contains_key(event_id))
    }

    async fn mark_event_processed(
        &self,
        event_id: &str,
        kind: &str,
        _now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .processed_events
            .entry(event_id.to_string())
            .or_insert_with(|| kind.to_string());
        Ok(())
    }

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> CoreResult<()> {
        self.state.lock().await.anomalies.push(anomaly.clone());
        Ok(())
    }

    async fn anomalies(&self, limit: usize) -> CoreResult<Vec<ReconciliationAnomaly>> {
        let state = self.state.lock().await;
        Ok(state.anomalies.iter().rev().take(limit).cloned().collect())
    }
}
