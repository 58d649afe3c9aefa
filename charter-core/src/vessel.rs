use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A bookable vessel as published by the catalog sync.
///
/// Read-only inside a booking flow; deactivated rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vessel {
    pub id: Uuid,
    /// Public, URL-stable code (e.g. `37-AXO`).
    pub code: String,
    pub name: String,
    pub allowed_durations: BTreeSet<u32>,
    pub min_hours: Option<u32>,
    pub max_hours: Option<u32>,
    pub capacity: Option<u32>,
    pub active: bool,
}

impl Vessel {
    /// Duration must be in the allowed set and inside the min/max bounds when set.
    pub fn offers_duration(&self, hours: u32) -> bool {
        self.allowed_durations.contains(&hours)
            && self.min_hours.map_or(true, |min| hours >= min)
            && self.max_hours.map_or(true, |max| hours <= max)
    }

    pub fn admits_guests(&self, guests: u32) -> bool {
        guests >= 1 && self.capacity.map_or(true, |cap| guests <= cap)
    }
}

/// How departures are laid out within a day.
///
/// Exactly one mode is authoritative for a vessel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Fixed daily departure times.
    Fixed { start_times: Vec<NaiveTime> },
    /// Departures every `increment_minutes` from `earliest_departure`, as long
    /// as the charter is back by `latest_return`.
    Rolling {
        earliest_departure: NaiveTime,
        latest_return: NaiveTime,
        increment_minutes: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleRule {
    pub vessel_id: Uuid,
    /// Zone the daily times are expressed in (the marina's local time).
    pub timezone: Tz,
    #[serde(flatten)]
    pub mode: ScheduleMode,
}

/// Per-vessel rate card. Amounts are integer minor units (cents).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingRule {
    pub vessel_id: Uuid,
    pub currency: String,
    /// Duration in hours -> base price in cents.
    pub base_rates: BTreeMap<u32, i64>,
    pub extra_hour_cents: Option<i64>,
    /// Deposit terms as published by the catalog; not interpreted here.
    #[serde(default)]
    pub deposit_policy: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentModel {
    /// Part collected upfront, remainder settled with the vendor.
    SplitPayment,
    /// Entire line collected through the gateway.
    FullCollection,
    /// Platform collects a fixed fee per unit, vendor bills the rest.
    FlatFee,
    /// Recorded only; the vendor bills the customer directly.
    VendorDirect,
}

impl PaymentModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentModel::SplitPayment => "split_payment",
            PaymentModel::FullCollection => "full_collection",
            PaymentModel::FlatFee => "flat_fee",
            PaymentModel::VendorDirect => "vendor_direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "split_payment" => Some(PaymentModel::SplitPayment),
            "full_collection" => Some(PaymentModel::FullCollection),
            "flat_fee" => Some(PaymentModel::FlatFee),
            "vendor_direct" => Some(PaymentModel::VendorDirect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddOn {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub vendor: Option<String>,
    pub payment_model: PaymentModel,
    pub unit_price_cents: i64,
    /// Share collected upfront for `split_payment` (defaults to 50).
    pub upfront_percent: Option<u8>,
    /// Per-unit platform fee for `flat_fee`.
    pub flat_fee_cents: Option<i64>,
    pub active: bool,
}
