use async_trait::async_trait;
use charter_core::repository::CatalogProvider;
use charter_core::vessel::{AddOn, PaymentModel, PricingRule, ScheduleMode, ScheduleRule, Vessel};
use charter_core::{CoreError, CoreResult};
use chrono::NaiveTime;
use chrono_tz::Tz;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::database::db_error;

fn corrupt(what: &str, detail: impl std::fmt::Display) -> CoreError {
    CoreError::Internal(format!("bad catalog {what}: {detail}"))
}

fn hours(value: i32, what: &str) -> CoreResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(what, value))
}

#[derive(sqlx::FromRow)]
struct VesselRow {
    id: Uuid,
    code: String,
    name: String,
    allowed_durations: Vec<i32>,
    min_hours: Option<i32>,
    max_hours: Option<i32>,
    capacity: Option<i32>,
    active: bool,
}

impl TryFrom<VesselRow> for Vessel {
    type Error = CoreError;

    fn try_from(row: VesselRow) -> CoreResult<Self> {
        Ok(Vessel {
            id: row.id,
            allowed_durations: row
                .allowed_durations
                .into_iter()
                .map(|h| hours(h, "allowed duration"))
                .collect::<CoreResult<_>>()?,
            min_hours: row.min_hours.map(|h| hours(h, "min_hours")).transpose()?,
            max_hours: row.max_hours.map(|h| hours(h, "max_hours")).transpose()?,
            capacity: row.capacity.map(|c| hours(c, "capacity")).transpose()?,
            code: row.code,
            name: row.name,
            active: row.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    vessel_id: Uuid,
    timezone: String,
    mode: String,
    start_times: Option<Vec<NaiveTime>>,
    earliest_departure: Option<NaiveTime>,
    latest_return: Option<NaiveTime>,
    increment_minutes: Option<i32>,
}

impl TryFrom<ScheduleRow> for ScheduleRule {
    type Error = CoreError;

    fn try_from(row: ScheduleRow) -> CoreResult<Self> {
        let timezone: Tz = row
            .timezone
            .parse()
            .map_err(|e| corrupt("timezone", e))?;

        let mode = match (row.mode.as_str(), row.start_times) {
            ("fixed", Some(start_times)) => ScheduleMode::Fixed { start_times },
            ("rolling", _) => match (row.earliest_departure, row.latest_return, row.increment_minutes) {
                (Some(earliest_departure), Some(latest_return), Some(step)) => ScheduleMode::Rolling {
                    earliest_departure,
                    latest_return,
                    increment_minutes: u32::try_from(step)
                        .map_err(|_| corrupt("increment", step))?,
                },
                _ => return Err(corrupt("rolling window", row.vessel_id)),
            },
            (other, _) => return Err(corrupt("schedule mode", other)),
        };

        Ok(ScheduleRule {
            vessel_id: row.vessel_id,
            timezone,
            mode,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PricingRow {
    vessel_id: Uuid,
    currency: String,
    base_rates: serde_json::Value,
    extra_hour_cents: Option<i64>,
    deposit_policy: serde_json::Value,
}

impl TryFrom<PricingRow> for PricingRule {
    type Error = CoreError;

    fn try_from(row: PricingRow) -> CoreResult<Self> {
        // JSON object keys are strings; serde parses "4" into 4u32.
        let base_rates: BTreeMap<u32, i64> =
            serde_json::from_value(row.base_rates).map_err(|e| corrupt("base_rates", e))?;
        Ok(PricingRule {
            vessel_id: row.vessel_id,
            currency: row.currency,
            base_rates,
            extra_hour_cents: row.extra_hour_cents,
            deposit_policy: row.deposit_policy,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AddOnRow {
    id: Uuid,
    code: String,
    name: String,
    vendor: Option<String>,
    payment_model: String,
    unit_price_cents: i64,
    upfront_percent: Option<i16>,
    flat_fee_cents: Option<i64>,
    active: bool,
}

impl TryFrom<AddOnRow> for AddOn {
    type Error = CoreError;

    fn try_from(row: AddOnRow) -> CoreResult<Self> {
        Ok(AddOn {
            payment_model: PaymentModel::parse(&row.payment_model)
                .ok_or_else(|| corrupt("payment model", &row.payment_model))?,
            upfront_percent: row
                .upfront_percent
                .map(|p| u8::try_from(p).map_err(|_| corrupt("upfront_percent", p)))
                .transpose()?,
            id: row.id,
            code: row.code,
            name: row.name,
            vendor: row.vendor,
            unit_price_cents: row.unit_price_cents,
            flat_fee_cents: row.flat_fee_cents,
            active: row.active,
        })
    }
}

/// Catalog tables maintained by the external catalog sync.
pub struct PgCatalogProvider {
    pool: PgPool,
}

impl PgCatalogProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const VESSEL_SELECT: &str = "SELECT id, code, name, allowed_durations, min_hours, max_hours, capacity, active FROM vessels";

#[async_trait]
impl CatalogProvider for PgCatalogProvider {
    async fn vessel_by_code(&self, code: &str) -> CoreResult<Option<Vessel>> {
        sqlx::query_as::<_, VesselRow>(&format!("{VESSEL_SELECT} WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Vessel::try_from)
            .transpose()
    }

    async fn vessel_by_id(&self, id: Uuid) -> CoreResult<Option<Vessel>> {
        sqlx::query_as::<_, VesselRow>(&format!("{VESSEL_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Vessel::try_from)
            .transpose()
    }

    async fn schedule_rule(&self, vessel_id: Uuid) -> CoreResult<Option<ScheduleRule>> {
        sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT vessel_id, timezone, mode, start_times, earliest_departure,
                   latest_return, increment_minutes
            FROM schedule_rules
            WHERE vessel_id = $1
            "#,
        )
        .bind(vessel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(ScheduleRule::try_from)
        .transpose()
    }

    async fn pricing_rule(&self, vessel_id: Uuid) -> CoreResult<Option<PricingRule>> {
        sqlx::query_as::<_, PricingRow>(
            r#"
            SELECT vessel_id, currency, base_rates, extra_hour_cents, deposit_policy
            FROM pricing_rules
            WHERE vessel_id = $1
            "#,
        )
        .bind(vessel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(PricingRule::try_from)
        .transpose()
    }

    async fn add_on_by_code(&self, code: &str) -> CoreResult<Option<AddOn>> {
        sqlx::query_as::<_, AddOnRow>(
            r#"
            SELECT id, code, name, vendor, payment_model, unit_price_cents,
                   upfront_percent, flat_fee_cents, active
            FROM add_ons
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(AddOn::try_from)
        .transpose()
    }
}
