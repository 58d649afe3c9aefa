use async_trait::async_trait;
use charter_core::payment::{Payment, PaymentStatus};
use charter_core::repository::ReservationStore;
use charter_core::reservation::{
    AddOnAttachment, AddOnPaymentStatus, AnomalyKind, AvailabilityBlock, BlockType, CancelReason,
    ConfirmOutcome, Customer, CustomerContact, ReconciliationAnomaly, ReleasedHold, Reservation,
    ReservationStatus,
};
use charter_core::vessel::PaymentModel;
use charter_core::{CoreError, CoreResult, TimeRange};
use charter_shared::Masked;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{db_error, is_exclusion_violation};

macro_rules! reservation_columns {
    () => {
        "id, code, vessel_id, customer_id, starts_at, ends_at, duration_hours, guest_count, \
         occasion, status, hold_expires_at, cancel_reason, created_at, updated_at"
    };
}

macro_rules! payment_columns {
    () => {
        "id, reservation_id, session_id, payment_intent_id, amount_cents, currency, status, \
         created_at, updated_at"
    };
}

macro_rules! attachment_columns {
    () => {
        "id, reservation_id, session_id, add_on_id, add_on_code, quantity, payment_model, \
         upfront_cents, balance_due_cents, payment_status"
    };
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> CoreError {
    CoreError::Internal(format!("unexpected {what} in database: {value}"))
}

fn to_i32(value: u32, what: &str) -> CoreResult<i32> {
    i32::try_from(value).map_err(|_| CoreError::InvalidRequest(format!("{what} out of range")))
}

fn to_u32(value: i32, what: &str) -> CoreResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(what, value))
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    code: String,
    vessel_id: Uuid,
    customer_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    duration_hours: i32,
    guest_count: i32,
    occasion: Option<String>,
    status: String,
    hold_expires_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = CoreError;

    fn try_from(row: ReservationRow) -> CoreResult<Self> {
        let status = ReservationStatus::parse(&row.status)
            .ok_or_else(|| corrupt("reservation status", &row.status))?;
        let cancel_reason = match row.cancel_reason.as_deref() {
            Some(raw) => Some(CancelReason::parse(raw).ok_or_else(|| corrupt("cancel reason", raw))?),
            None => None,
        };
        Ok(Reservation {
            id: row.id,
            code: row.code,
            vessel_id: row.vessel_id,
            customer_id: row.customer_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            duration_hours: to_u32(row.duration_hours, "duration_hours")?,
            guest_count: to_u32(row.guest_count, "guest_count")?,
            occasion: row.occasion,
            status,
            hold_expires_at: row.hold_expires_at,
            cancel_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    id: Uuid,
    vessel_id: Uuid,
    reservation_id: Option<Uuid>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    block_type: String,
    source: String,
}

impl TryFrom<BlockRow> for AvailabilityBlock {
    type Error = CoreError;

    fn try_from(row: BlockRow) -> CoreResult<Self> {
        Ok(AvailabilityBlock {
            id: row.id,
            vessel_id: row.vessel_id,
            reservation_id: row.reservation_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            block_type: BlockType::parse(&row.block_type)
                .ok_or_else(|| corrupt("block type", &row.block_type))?,
            source: row.source,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            email: Masked::new(row.email),
            name: row.name,
            phone: row.phone.map(Masked::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttachmentRow {
    id: Uuid,
    reservation_id: Uuid,
    session_id: String,
    add_on_id: Uuid,
    add_on_code: String,
    quantity: i32,
    payment_model: String,
    upfront_cents: i64,
    balance_due_cents: i64,
    payment_status: String,
}

impl TryFrom<AttachmentRow> for AddOnAttachment {
    type Error = CoreError;

    fn try_from(row: AttachmentRow) -> CoreResult<Self> {
        Ok(AddOnAttachment {
            id: row.id,
            reservation_id: row.reservation_id,
            session_id: row.session_id,
            add_on_id: row.add_on_id,
            add_on_code: row.add_on_code,
            quantity: to_u32(row.quantity, "quantity")?,
            payment_model: PaymentModel::parse(&row.payment_model)
                .ok_or_else(|| corrupt("payment model", &row.payment_model))?,
            upfront_cents: row.upfront_cents,
            balance_due_cents: row.balance_due_cents,
            payment_status: AddOnPaymentStatus::parse(&row.payment_status)
                .ok_or_else(|| corrupt("add-on payment status", &row.payment_status))?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    reservation_id: Uuid,
    session_id: String,
    payment_intent_id: Option<String>,
    amount_cents: i64,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = CoreError;

    fn try_from(row: PaymentRow) -> CoreResult<Self> {
        Ok(Payment {
            id: row.id,
            reservation_id: row.reservation_id,
            session_id: row.session_id,
            payment_intent_id: row.payment_intent_id,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: PaymentStatus::parse(&row.status)
                .ok_or_else(|| corrupt("payment status", &row.status))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnomalyRow {
    id: Uuid,
    kind: String,
    event_id: String,
    reservation_id: Option<Uuid>,
    session_id: Option<String>,
    payment_intent_id: Option<String>,
    detail: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<AnomalyRow> for ReconciliationAnomaly {
    type Error = CoreError;

    fn try_from(row: AnomalyRow) -> CoreResult<Self> {
        let kind = match row.kind.as_str() {
            "stale_confirmation" => AnomalyKind::StaleConfirmation,
            "unknown_reservation" => AnomalyKind::UnknownReservation,
            "unknown_payment" => AnomalyKind::UnknownPayment,
            other => return Err(corrupt("anomaly kind", other)),
        };
        Ok(ReconciliationAnomaly {
            id: row.id,
            kind,
            event_id: row.event_id,
            reservation_id: row.reservation_id,
            session_id: row.session_id,
            payment_intent_id: row.payment_intent_id,
            detail: row.detail,
            recorded_at: row.recorded_at,
        })
    }
}

/// Postgres-backed reservation store.
///
/// The `no_overlapping_bookings` exclusion constraint is the final word on
/// double-booking; the advisory lock and re-check in `insert_hold` only make
/// the common conflict path cheap and well-reported.
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> CoreResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(db_error)
    }
}

/// Per-vessel key for `pg_advisory_xact_lock`.
fn vessel_lock_key(vessel_id: Uuid) -> i64 {
    let (hi, lo) = vessel_id.as_u64_pair();
    (hi ^ lo) as i64
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn blocks_overlapping(
        &self,
        vessel_id: Uuid,
        window: TimeRange,
    ) -> CoreResult<Vec<AvailabilityBlock>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT id, vessel_id, reservation_id, starts_at, ends_at, block_type, source
            FROM availability_blocks
            WHERE vessel_id = $1 AND starts_at < $3 AND ends_at > $2
            ORDER BY starts_at
            "#,
        )
        .bind(vessel_id)
        .bind(window.start())
        .bind(window.end())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(AvailabilityBlock::try_from).collect()
    }

    async fn upsert_customer(
        &self,
        contact: &CustomerContact,
        now: DateTime<Utc>,
    ) -> CoreResult<Customer> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            INSERT INTO customers (id, email, name, phone, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (email) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, customers.name),
                phone = COALESCE(EXCLUDED.phone, customers.phone),
                updated_at = EXCLUDED.updated_at
            RETURNING id, email, name, phone, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(contact.normalized_email())
        .bind(contact.name.as_deref())
        .bind(contact.phone.as_ref().map(|p| p.expose().as_str()))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.into())
    }

    async fn customer(&self, id: Uuid) -> CoreResult<Option<Customer>> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, email, name, phone, created_at, updated_at FROM customers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Customer::from))
    }

    async fn insert_hold(
        &self,
        reservation: &Reservation,
        block: &AvailabilityBlock,
    ) -> CoreResult<()> {
        let slot = reservation.slot().ok_or_else(|| {
            CoreError::InvalidRequest("reservation must end after it starts".into())
        })?;
        let unavailable = || CoreError::SlotUnavailable {
            vessel: reservation.vessel_id.to_string(),
            start: reservation.starts_at,
        };

        let mut tx = self.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(vessel_lock_key(reservation.vessel_id))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM availability_blocks
                WHERE vessel_id = $1
                  AND block_type IN ('hold', 'confirmed_reservation')
                  AND starts_at < $3 AND ends_at > $2
            )
            "#,
        )
        .bind(reservation.vessel_id)
        .bind(slot.start())
        .bind(slot.end())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        if taken {
            debug!(vessel_id = %reservation.vessel_id, start = %slot.start(), "Overlap found on re-check");
            return Err(unavailable());
        }

        sqlx::query(concat!(
            "INSERT INTO reservations (",
            reservation_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(reservation.id)
        .bind(&reservation.code)
        .bind(reservation.vessel_id)
        .bind(reservation.customer_id)
        .bind(reservation.starts_at)
        .bind(reservation.ends_at)
        .bind(to_i32(reservation.duration_hours, "duration_hours")?)
        .bind(to_i32(reservation.guest_count, "guest_count")?)
        .bind(reservation.occasion.as_deref())
        .bind(reservation.status.as_str())
        .bind(reservation.hold_expires_at)
        .bind(reservation.cancel_reason.map(|r| r.as_str()))
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO availability_blocks
                (id, vessel_id, reservation_id, starts_at, ends_at, block_type, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(block.id)
        .bind(block.vessel_id)
        .bind(block.reservation_id)
        .bind(block.starts_at)
        .bind(block.ends_at)
        .bind(block.block_type.as_str())
        .bind(&block.source)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_exclusion_violation(&e) => return Err(unavailable()),
            Err(e) => return Err(db_error(e)),
        }

        tx.commit().await.map_err(db_error)
    }

    async fn reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        sqlx::query_as::<_, ReservationRow>(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Reservation::try_from)
        .transpose()
    }

    async fn reservation_by_code(&self, code: &str) -> CoreResult<Option<Reservation>> {
        sqlx::query_as::<_, ReservationRow>(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Reservation::try_from)
        .transpose()
    }

    async fn confirm_hold(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<ConfirmOutcome> {
        let mut tx = self.begin().await?;

        let current: Reservation = sqlx::query_as::<_, ReservationRow>(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| CoreError::ReservationNotFound(id.to_string()))?
        .try_into()?;

        match current.status {
            ReservationStatus::Confirmed | ReservationStatus::Completed => {
                return Ok(ConfirmOutcome::AlreadyConfirmed(current))
            }
            ReservationStatus::Hold if current.is_live_hold(now) => {}
            _ => return Ok(ConfirmOutcome::Stale(current)),
        }

        let confirmed: Reservation = sqlx::query_as::<_, ReservationRow>(concat!(
            "UPDATE reservations SET status = 'confirmed', hold_expires_at = NULL, updated_at = $2 \
             WHERE id = $1 RETURNING ",
            reservation_columns!()
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?
        .try_into()?;

        sqlx::query(
            "UPDATE availability_blocks SET block_type = 'confirmed_reservation' WHERE reservation_id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        info!(reservation_id = %id, "Hold confirmed");
        Ok(ConfirmOutcome::Confirmed(confirmed))
    }

    async fn release_hold(
        &self,
        id: Uuid,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Reservation>> {
        let mut tx = self.begin().await?;

        let released = sqlx::query_as::<_, ReservationRow>(concat!(
            "UPDATE reservations SET status = 'cancelled', cancel_reason = $2, \
             hold_expires_at = NULL, updated_at = $3 \
             WHERE id = $1 AND status = 'hold' AND (NOT $4 OR hold_expires_at <= $3) \
             RETURNING ",
            reservation_columns!()
        ))
        .bind(id)
        .bind(reason.as_str())
        .bind(now)
        .bind(reason == CancelReason::Expired)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(row) = released else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM availability_blocks WHERE reservation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Reservation::try_from(row).map(Some)
    }

    async fn expire_lapsed_holds(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> CoreResult<Vec<ReleasedHold>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut tx = self.begin().await?;

        let rows: Vec<(Uuid, Uuid, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            WITH lapsed AS (
                SELECT id FROM reservations
                WHERE status = 'hold' AND hold_expires_at <= $1
                ORDER BY hold_expires_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE reservations r
            SET status = 'cancelled', cancel_reason = 'expired',
                hold_expires_at = NULL, updated_at = $1
            FROM lapsed
            WHERE r.id = lapsed.id
            RETURNING r.id, r.vessel_id, r.starts_at, r.ends_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.0).collect();
        sqlx::query("DELETE FROM availability_blocks WHERE reservation_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|(reservation_id, vessel_id, starts_at, ends_at)| ReleasedHold {
                reservation_id,
                vessel_id,
                starts_at,
                ends_at,
            })
            .collect())
    }

    async fn attach_add_ons(
        &self,
        session_id: &str,
        attachments: &[AddOnAttachment],
    ) -> CoreResult<()> {
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM add_on_attachments WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        for a in attachments {
            sqlx::query(
                r#"
                INSERT INTO add_on_attachments
                    (id, reservation_id, session_id, add_on_id, add_on_code, quantity,
                     payment_model, upfront_cents, balance_due_cents, payment_status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(a.id)
            .bind(a.reservation_id)
            .bind(session_id)
            .bind(a.add_on_id)
            .bind(&a.add_on_code)
            .bind(to_i32(a.quantity, "quantity")?)
            .bind(a.payment_model.as_str())
            .bind(a.upfront_cents)
            .bind(a.balance_due_cents)
            .bind(a.payment_status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)
    }

    async fn add_ons(&self, reservation_id: Uuid) -> CoreResult<Vec<AddOnAttachment>> {
        let rows = sqlx::query_as::<_, AttachmentRow>(concat!(
            "SELECT ",
            attachment_columns!(),
            " FROM add_on_attachments WHERE reservation_id = $1 ORDER BY session_id, add_on_code"
        ))
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(AddOnAttachment::try_from).collect()
    }

    async fn session_add_ons(&self, session_id: &str) -> CoreResult<Vec<AddOnAttachment>> {
        let rows = sqlx::query_as::<_, AttachmentRow>(concat!(
            "SELECT ",
            attachment_columns!(),
            " FROM add_on_attachments WHERE session_id = $1 ORDER BY add_on_code"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(AddOnAttachment::try_from).collect()
    }

    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()> {
        sqlx::query(concat!(
            "INSERT INTO payments (",
            payment_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(payment.id)
        .bind(payment.reservation_id)
        .bind(&payment.session_id)
        .bind(payment.payment_intent_id.as_deref())
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn payment_by_session(&self, session_id: &str) -> CoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Payment::try_from)
        .transpose()
    }

    async fn payments_for(&self, reservation_id: Uuid) -> CoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE reservation_id = $1 ORDER BY created_at"
        ))
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn settle_payment_session(
        &self,
        session_id: &str,
        payment_intent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Payment>> {
        let mut tx = self.begin().await?;

        let Some(row) = sqlx::query_as::<_, PaymentRow>(concat!(
            "UPDATE payments SET status = 'succeeded', \
             payment_intent_id = COALESCE(payment_intent_id, $2), updated_at = $3 \
             WHERE session_id = $1 RETURNING ",
            payment_columns!()
        ))
        .bind(session_id)
        .bind(payment_intent_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE add_on_attachments SET payment_status = 'upfront_paid' \
             WHERE session_id = $1 AND payment_status = 'pending'",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Payment::try_from(row).map(Some)
    }

    async fn update_payment_by_intent(
        &self,
        payment_intent_id: &str,
        fallback_reservation: Option<Uuid>,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Payment>> {
        let mut tx = self.begin().await?;

        let mut found = sqlx::query_as::<_, PaymentRow>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE payment_intent_id = $1 FOR UPDATE"
        ))
        .bind(payment_intent_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        if found.is_none() {
            if let Some(reservation_id) = fallback_reservation {
                found = sqlx::query_as::<_, PaymentRow>(concat!(
                    "SELECT ",
                    payment_columns!(),
                    " FROM payments WHERE reservation_id = $1 AND payment_intent_id IS NULL \
                     AND status = 'pending' ORDER BY created_at DESC LIMIT 1 FOR UPDATE"
                ))
                .bind(reservation_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
            }
        }

        let Some(row) = found else {
            return Ok(None);
        };
        let current = Payment::try_from(row)?;
        let next = current.status.after_event(status);

        let updated = sqlx::query_as::<_, PaymentRow>(concat!(
            "UPDATE payments SET status = $2, payment_intent_id = $3, updated_at = $4 \
             WHERE id = $1 RETURNING ",
            payment_columns!()
        ))
        .bind(current.id)
        .bind(next.as_str())
        .bind(current.payment_intent_id.as_deref().unwrap_or(payment_intent_id))
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Payment::try_from(updated).map(Some)
    }

    async fn event_processed(&self, event_id: &str) -> CoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM processed_events WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn mark_event_processed(
        &self,
        event_id: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO processed_events (event_id, kind, processed_at) VALUES ($1, $2, $3) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(kind)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_anomalies
                (id, kind, event_id, reservation_id, session_id, payment_intent_id, detail, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(anomaly.id)
        .bind(anomaly.kind.as_str())
        .bind(&anomaly.event_id)
        .bind(anomaly.reservation_id)
        .bind(anomaly.session_id.as_deref())
        .bind(anomaly.payment_intent_id.as_deref())
        .bind(&anomaly.detail)
        .bind(anomaly.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn anomalies(&self, limit: usize) -> CoreResult<Vec<ReconciliationAnomaly>> {
        let rows = sqlx::query_as::<_, AnomalyRow>(
            r#"
            SELECT id, kind, event_id, reservation_id, session_id, payment_intent_id, detail, recorded_at
            FROM reconciliation_anomalies
            ORDER BY recorded_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(ReconciliationAnomaly::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_per_vessel() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(vessel_lock_key(a), vessel_lock_key(a));
        assert_ne!(vessel_lock_key(a), vessel_lock_key(b));
    }
}
