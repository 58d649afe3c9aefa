use async_trait::async_trait;
use charter_core::payment::{CheckoutSession, CheckoutSessionRequest, PaymentEvent, PaymentGateway};
use charter_core::{CoreError, CoreResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Hosted-checkout client for the Stripe REST API.
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(api_base: &str, secret_key: &str, timeout: Duration) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

/// Form body for `POST /v1/checkout/sessions`.
///
/// `reservation_id` is copied into the payment intent's metadata as well, so
/// `payment_intent.*` events can be routed without the session.
pub(crate) fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("expires_at".to_string(), request.expires_at.timestamp().to_string()),
        ("client_reference_id".to_string(), request.reservation_code.clone()),
    ];

    if let Some(email) = &request.customer_email {
        form.push(("customer_email".into(), email.expose().clone()));
    }

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((format!("{prefix}[price_data][currency]"), request.currency.clone()));
        form.push((format!("{prefix}[price_data][product_data][name]"), item.name.clone()));
        form.push((format!("{prefix}[price_data][unit_amount]"), item.amount_cents.to_string()));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
        form.push((format!("payment_intent_data[metadata][{key}]"), value.clone()));
    }

    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> CoreResult<CheckoutSession> {
        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("checkout-{}-{}", request.reservation_id, request.total_cents()))
            .form(&session_form(request))
            .send()
            .await
            .map_err(|e| {
                error!(reservation_id = %request.reservation_id, "Stripe request failed: {}", e);
                CoreError::Upstream(format!("payment gateway unreachable: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| status.to_string());
            error!(reservation_id = %request.reservation_id, %status, "Stripe rejected checkout: {}", message);
            return Err(CoreError::Upstream(format!("payment gateway error: {message}")));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Upstream(format!("unreadable gateway response: {e}")))?;
        let url = session
            .url
            .ok_or_else(|| CoreError::Upstream("checkout session has no url".into()))?;

        info!(reservation_id = %request.reservation_id, session_id = %session.id, "Checkout session created");
        Ok(CheckoutSession { id: session.id, url })
    }
}

#[derive(Deserialize)]
struct WireEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: WireData,
}

#[derive(Deserialize)]
struct WireData {
    object: WireObject,
}

#[derive(Deserialize)]
struct WireObject {
    id: String,
    /// Set on checkout sessions once paid.
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    last_payment_error: Option<ErrorBody>,
}

/// Decode a verified webhook body. `Ok(None)` for event types we do not act on.
pub fn decode_event(body: &[u8]) -> CoreResult<Option<PaymentEvent>> {
    let wire: WireEvent = serde_json::from_slice(body)
        .map_err(|e| CoreError::InvalidRequest(format!("unreadable payment event: {e}")))?;
    let object = wire.data.object;
    let reservation_id = object
        .metadata
        .get("reservation_id")
        .and_then(|v| Uuid::parse_str(v).ok());

    let event = match wire.kind.as_str() {
        "checkout.session.completed" => PaymentEvent::CheckoutCompleted {
            event_id: wire.id,
            session_id: object.id,
            payment_intent_id: object.payment_intent,
            reservation_id,
        },
        "payment_intent.succeeded" => PaymentEvent::PaymentSucceeded {
            event_id: wire.id,
            payment_intent_id: object.id,
            reservation_id,
        },
        "payment_intent.payment_failed" => PaymentEvent::PaymentFailed {
            event_id: wire.id,
            payment_intent_id: object.id,
            reservation_id,
            failure_message: object.last_payment_error.and_then(|e| e.message),
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter_core::payment::LineItem;
    use charter_shared::Masked;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn test_session_form_layout() {
        let reservation_id = Uuid::new_v4();
        let request = CheckoutSessionRequest {
            reservation_id,
            reservation_code: "BK-ABC".into(),
            currency: "usd".into(),
            line_items: vec![LineItem {
                name: "4h charter".into(),
                amount_cents: 120_000,
                quantity: 1,
            }],
            success_url: "https://example.test/ok".into(),
            cancel_url: "https://example.test/cancel".into(),
            expires_at: Utc.with_ymd_and_hms(2030, 6, 1, 9, 15, 0).unwrap(),
            customer_email: Some(Masked::new("ana@example.com".into())),
            metadata: BTreeMap::from([("reservation_id".to_string(), reservation_id.to_string())]),
        };

        let form = session_form(&request);
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("120000"));
        assert_eq!(get("expires_at"), Some(request.expires_at.timestamp().to_string().as_str()));
        assert_eq!(get("metadata[reservation_id]"), Some(reservation_id.to_string().as_str()));
        assert_eq!(
            get("payment_intent_data[metadata][reservation_id]"),
            Some(reservation_id.to_string().as_str())
        );
        assert_eq!(get("customer_email"), Some("ana@example.com"));
    }

    #[test]
    fn test_decode_checkout_completed() {
        let reservation_id = Uuid::new_v4();
        let body = format!(
            r#"{{"id":"evt_1","type":"checkout.session.completed","data":{{"object":{{"id":"cs_1","payment_intent":"pi_1","metadata":{{"reservation_id":"{reservation_id}"}}}}}}}}"#
        );
        let event = decode_event(body.as_bytes()).unwrap().unwrap();
        assert_eq!(
            event,
            PaymentEvent::CheckoutCompleted {
                event_id: "evt_1".into(),
                session_id: "cs_1".into(),
                payment_intent_id: Some("pi_1".into()),
                reservation_id: Some(reservation_id),
            }
        );
    }

    #[test]
    fn test_decode_failure_message_and_ignored_types() {
        let failed = br#"{"id":"evt_2","type":"payment_intent.payment_failed","data":{"object":{"id":"pi_2","last_payment_error":{"message":"card_declined"}}}}"#;
        match decode_event(failed).unwrap() {
            Some(PaymentEvent::PaymentFailed { failure_message, reservation_id, .. }) => {
                assert_eq!(failure_message.as_deref(), Some("card_declined"));
                assert_eq!(reservation_id, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let refund = br#"{"id":"evt_3","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        assert_eq!(decode_event(refund).unwrap(), None);
        assert!(matches!(decode_event(b"not json"), Err(CoreError::InvalidRequest(_))));
    }
}
