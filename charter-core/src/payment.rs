use async_trait::async_trait;
use charter_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::CoreResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Status after the gateway reports `incoming`. `Succeeded` is terminal
    /// and only a pending attempt can fail.
    pub fn after_event(self, incoming: PaymentStatus) -> PaymentStatus {
        match (self, incoming) {
            (PaymentStatus::Succeeded, _) | (_, PaymentStatus::Succeeded) => PaymentStatus::Succeeded,
            (PaymentStatus::Pending, PaymentStatus::Failed) => PaymentStatus::Failed,
            (current, _) => current,
        }
    }
}

/// One payment attempt for a reservation, keyed by the gateway session id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub session_id: String,
    /// Assigned by the gateway once the customer pays.
    pub payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub name: String,
    /// Unit amount in cents.
    pub amount_cents: i64,
    pub quantity: u32,
}

impl LineItem {
    pub fn total_cents(&self) -> i64 {
        self.amount_cents * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub reservation_id: Uuid,
    pub reservation_code: String,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
    /// Never later than the hold expiry.
    pub expires_at: DateTime<Utc>,
    pub customer_email: Option<Masked<String>>,
    /// Echoed back on every gateway event (`reservation_id` at minimum).
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSessionRequest {
    pub fn total_cents(&self) -> i64 {
        self.line_items.iter().map(LineItem::total_cents).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    /// Client-facing hosted checkout URL.
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create a hosted checkout session. Failures map to `CoreError::Upstream`.
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> CoreResult<CheckoutSession>;
}

/// Verified gateway event, already decoded from the provider's wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    CheckoutCompleted {
        event_id: String,
        session_id: String,
        payment_intent_id: Option<String>,
        reservation_id: Option<Uuid>,
    },
    PaymentSucceeded {
        event_id: String,
        payment_intent_id: String,
        reservation_id: Option<Uuid>,
    },
    PaymentFailed {
        event_id: String,
        payment_intent_id: String,
        reservation_id: Option<Uuid>,
        failure_message: Option<String>,
    },
}

impl PaymentEvent {
    pub fn event_id(&self) -> &str {
        match self {
            PaymentEvent::CheckoutCompleted { event_id, .. }
            | PaymentEvent::PaymentSucceeded { event_id, .. }
            | PaymentEvent::PaymentFailed { event_id, .. } => event_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PaymentEvent::CheckoutCompleted { .. } => "checkout_completed",
            PaymentEvent::PaymentSucceeded { .. } => "payment_succeeded",
            PaymentEvent::PaymentFailed { .. } => "payment_failed",
        }
    }
}
