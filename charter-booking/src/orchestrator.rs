use async_trait::async_trait;
use charter_catalog::{add_on_charge, PricingResolver, VesselDirectory};
use charter_core::payment::{
    CheckoutSession, CheckoutSessionRequest, LineItem, Payment, PaymentEvent, PaymentGateway,
    PaymentStatus,
};
use charter_core::repository::ReservationStore;
use charter_core::reservation::{
    AddOnAttachment, AddOnPaymentStatus, AnomalyKind, ConfirmOutcome, ReconciliationAnomaly,
};
use charter_core::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::manager::ReservationManager;

#[derive(Debug, Clone, Deserialize)]
pub struct AddOnSelection {
    pub code: String,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// `{RESERVATION_CODE}` is replaced with the reservation code.
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub reservation_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
    pub amount_cents: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
    pub add_ons: Vec<AddOnAttachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// Event id already in the processed ledger.
    Duplicate,
    /// Recorded for manual review; the sender still gets a success response.
    Anomaly(AnomalyKind),
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::Anomaly(_) => "anomaly",
        }
    }
}

/// Ties holds to gateway checkout sessions and folds gateway events back
/// into reservation and payment state.
pub struct CheckoutBridge {
    manager: Arc<ReservationManager>,
    directory: VesselDirectory,
    pricing: PricingResolver,
    gateway: Arc<dyn PaymentGateway>,
    urls: CheckoutUrls,
    gateway_timeout: Duration,
}

impl CheckoutBridge {
    pub fn new(
        manager: Arc<ReservationManager>,
        directory: VesselDirectory,
        pricing: PricingResolver,
        gateway: Arc<dyn PaymentGateway>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            manager,
            directory,
            pricing,
            gateway,
            urls,
            gateway_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub async fn create_checkout_session(
        &self,
        reservation_id: Uuid,
        selections: &[AddOnSelection],
    ) -> CoreResult<CheckoutOutcome> {
        let hold = self.manager.live_hold(reservation_id).await?;
        let expires_at = hold.hold_expires_at.ok_or_else(|| {
            CoreError::Internal(format!("hold {} has no expiry", hold.code))
        })?;

        let vessel = self.directory.vessel_by_id(hold.vessel_id).await?;
        let base = self.pricing.base_price(&vessel, hold.duration_hours).await?;

        let mut line_items = vec![LineItem {
            name: format!("{} ({}h charter)", vessel.name, hold.duration_hours),
            amount_cents: base.amount_cents,
            quantity: 1,
        }];

        let mut seen = HashSet::new();
        let mut priced = Vec::with_capacity(selections.len());
        for selection in selections {
            if !seen.insert(selection.code.as_str()) {
                return Err(CoreError::InvalidRequest(format!(
                    "add-on {} selected twice",
                    selection.code
                )));
            }
            let add_on = self.directory.add_on(&selection.code).await?;
            let charge = add_on_charge(&add_on, selection.quantity)?;

            if charge.upfront_cents > 0 {
                line_items.push(LineItem {
                    name: format!("{} x{}", add_on.name, selection.quantity),
                    amount_cents: charge.upfront_cents,
                    quantity: 1,
                });
            }
            priced.push((add_on, selection.quantity, charge));
        }

        let store = self.manager.store();
        let customer_email = store.customer(hold.customer_id).await?.map(|c| c.email);
        let request = CheckoutSessionRequest {
            reservation_id,
            reservation_code: hold.code.clone(),
            currency: base.currency.clone(),
            line_items,
            success_url: self.urls.success_url.replace("{RESERVATION_CODE}", &hold.code),
            cancel_url: self.urls.cancel_url.replace("{RESERVATION_CODE}", &hold.code),
            expires_at,
            customer_email,
            metadata: BTreeMap::from([
                ("reservation_id".to_string(), reservation_id.to_string()),
                ("reservation_code".to_string(), hold.code.clone()),
            ]),
        };
        let amount_cents = request.total_cents();

        let session = self.open_session(&request).await?;

        // A retried request may get the same session back from the gateway.
        let now = self.manager.now();
        if store.payment_by_session(&session.id).await?.is_none() {
            store
                .insert_payment(&Payment {
                    id: Uuid::new_v4(),
                    reservation_id,
                    session_id: session.id.clone(),
                    payment_intent_id: None,
                    amount_cents,
                    currency: base.currency.clone(),
                    status: PaymentStatus::Pending,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
        }

        // Keyed by session; earlier sessions of this hold keep theirs.
        let attachments: Vec<AddOnAttachment> = priced
            .into_iter()
            .map(|(add_on, quantity, charge)| AddOnAttachment {
                id: Uuid::new_v4(),
                reservation_id,
                session_id: session.id.clone(),
                add_on_id: add_on.id,
                add_on_code: add_on.code,
                quantity,
                payment_model: add_on.payment_model,
                upfront_cents: charge.upfront_cents,
                balance_due_cents: charge.balance_due_cents,
                payment_status: AddOnPaymentStatus::seeded_for(add_on.payment_model),
            })
            .collect();
        store.attach_add_ons(&session.id, &attachments).await?;

        info!(
            reservation_id = %reservation_id,
            session_id = %session.id,
            gateway = self.gateway.name(),
            amount_cents,
            "Checkout session opened"
        );
        Ok(CheckoutOutcome {
            reservation_id,
            session_id: session.id,
            checkout_url: session.url,
            amount_cents,
            currency: base.currency,
            expires_at,
            add_ons: attachments,
        })
    }

    /// Add-ons of the session that paid, or of the newest session while
    /// nothing has been paid yet.
    pub async fn add_ons(&self, reservation_id: Uuid) -> CoreResult<Vec<AddOnAttachment>> {
        let store = self.manager.store();
        let payments = store.payments_for(reservation_id).await?;
        let chosen = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .max_by_key(|p| p.updated_at)
            .or_else(|| payments.iter().max_by_key(|p| p.created_at));
        match chosen {
            Some(payment) => store.session_add_ons(&payment.session_id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn open_session(&self, request: &CheckoutSessionRequest) -> CoreResult<CheckoutSession> {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.create_checkout_session(request)).await {
            Ok(result) => result,
            Err(_) => {
                error!(reservation_id = %request.reservation_id, gateway = self.gateway.name(), "Checkout session timed out");
                Err(CoreError::Upstream("payment gateway timed out".into()))
            }
        }
    }

    /// Apply one verified gateway event. Safe to call repeatedly with the
    /// same event.
    pub async fn reconcile(&self, event: &PaymentEvent) -> CoreResult<ReconcileOutcome> {
        let store = self.manager.store();
        let event_id = event.event_id();
        if store.event_processed(event_id).await? {
            info!(event_id, kind = event.kind(), "Duplicate payment event ignored");
            return Ok(ReconcileOutcome::Duplicate);
        }
        let now = self.manager.now();

        let outcome = match event {
            PaymentEvent::CheckoutCompleted {
                session_id,
                payment_intent_id,
                reservation_id,
                ..
            } => {
                self.checkout_completed(event_id, session_id, payment_intent_id.as_deref(), *reservation_id, now)
                    .await?
            }
            PaymentEvent::PaymentSucceeded {
                payment_intent_id,
                reservation_id,
                ..
            } => {
                self.intent_update(event_id, payment_intent_id, *reservation_id, PaymentStatus::Succeeded, now)
                    .await?
            }
            PaymentEvent::PaymentFailed {
                payment_intent_id,
                reservation_id,
                failure_message,
                ..
            } => {
                warn!(
                    payment_intent_id = %payment_intent_id,
                    reason = failure_message.as_deref().unwrap_or("unspecified"),
                    "Payment failed; hold left to expire or retry"
                );
                self.intent_update(event_id, payment_intent_id, *reservation_id, PaymentStatus::Failed, now)
                    .await?
            }
        };

        store.mark_event_processed(event_id, event.kind(), now).await?;
        Ok(outcome)
    }

    async fn checkout_completed(
        &self,
        event_id: &str,
        session_id: &str,
        payment_intent_id: Option<&str>,
        reservation_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> CoreResult<ReconcileOutcome> {
        let store = self.manager.store();
        let payment = store.payment_by_session(session_id).await?;
        let anomaly = |kind, reservation_id, detail: String| ReconciliationAnomaly {
            id: Uuid::new_v4(),
            kind,
            event_id: event_id.to_string(),
            reservation_id,
            session_id: Some(session_id.to_string()),
            payment_intent_id: payment_intent_id.map(str::to_string),
            detail,
            recorded_at: now,
        };

        let Some(reservation_id) = reservation_id.or(payment.as_ref().map(|p| p.reservation_id)) else {
            return self
                .flag(anomaly(
                    AnomalyKind::UnknownReservation,
                    None,
                    "checkout completed without a reservation reference".into(),
                ))
                .await;
        };

        let mut first_anomaly = None;
        match self.manager.confirm_hold(reservation_id).await {
            Ok(ConfirmOutcome::Confirmed(_)) | Ok(ConfirmOutcome::AlreadyConfirmed(_)) => {}
            Ok(ConfirmOutcome::Stale(r)) => {
                let detail = format!(
                    "payment captured for {} reservation {} ({})",
                    r.status,
                    r.code,
                    r.cancel_reason.map_or("lapsed", |c| c.as_str())
                );
                first_anomaly = Some(
                    self.flag(anomaly(AnomalyKind::StaleConfirmation, Some(reservation_id), detail))
                        .await?,
                );
            }
            Err(CoreError::ReservationNotFound(_)) => {
                return self
                    .flag(anomaly(
                        AnomalyKind::UnknownReservation,
                        Some(reservation_id),
                        format!("reservation {reservation_id} does not exist"),
                    ))
                    .await;
            }
            Err(e) => return Err(e),
        }

        // Money moved either way, so the payment row is settled even when stale.
        if store
            .settle_payment_session(session_id, payment_intent_id, now)
            .await?
            .is_none()
        {
            let flagged = self
                .flag(anomaly(
                    AnomalyKind::UnknownPayment,
                    Some(reservation_id),
                    format!("no payment recorded for session {session_id}"),
                ))
                .await?;
            first_anomaly.get_or_insert(flagged);
        }

        Ok(first_anomaly.unwrap_or(ReconcileOutcome::Applied))
    }

    async fn intent_update(
        &self,
        event_id: &str,
        payment_intent_id: &str,
        reservation_id: Option<Uuid>,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<ReconcileOutcome> {
        let updated = self
            .manager
            .store()
            .update_payment_by_intent(payment_intent_id, reservation_id, status, now)
            .await?;

        match updated {
            Some(payment) => {
                info!(
                    payment_id = %payment.id,
                    reservation_id = %payment.reservation_id,
                    status = payment.status.as_str(),
                    "Payment updated from intent event"
                );
                Ok(ReconcileOutcome::Applied)
            }
            None => {
                self.flag(ReconciliationAnomaly {
                    id: Uuid::new_v4(),
                    kind: AnomalyKind::UnknownPayment,
                    event_id: event_id.to_string(),
                    reservation_id,
                    session_id: None,
                    payment_intent_id: Some(payment_intent_id.to_string()),
                    detail: format!("no payment matches intent {payment_intent_id}"),
                    recorded_at: now,
                })
                .await
            }
        }
    }

    async fn flag(&self, anomaly: ReconciliationAnomaly) -> CoreResult<ReconcileOutcome> {
        error!(
            kind = anomaly.kind.as_str(),
            event_id = %anomaly.event_id,
            reservation_id = ?anomaly.reservation_id,
            "Reconciliation anomaly: {}",
            anomaly.detail
        );
        self.manager.store().record_anomaly(&anomaly).await?;
        Ok(ReconcileOutcome::Anomaly(anomaly.kind))
    }
}

/// Requests kept by the mock gateway; older ones are dropped.
const MOCK_REQUEST_LOG: usize = 64;

/// In-process gateway for local runs and tests.
#[derive(Default)]
pub struct MockPaymentGateway {
    counter: AtomicU64,
    failing: AtomicBool,
    requests: Mutex<VecDeque<CheckoutSessionRequest>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail with an upstream error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The most recent requests, oldest first.
    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> CoreResult<CheckoutSession> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Upstream("simulated gateway failure".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut log = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            if log.len() == MOCK_REQUEST_LOG {
                log.pop_front();
            }
            log.push_back(request.clone());
        }

        let id = format!("cs_mock_{}_{n}", request.reservation_id.simple());
        Ok(CheckoutSession {
            url: format!("https://checkout.mock.local/pay/{id}"),
            id,
        })
    }
}
