//! Provider event parsing.
//!
//! Only the fields reconciliation needs are decoded. Unknown event types
//! parse successfully as [`PaymentEvent::Ignored`] so the webhook can
//! acknowledge them.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    /// Provider event id (`evt_...`), used for inbox dedupe.
    pub id: String,
    pub event_type: String,
    pub kind: PaymentEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    /// `checkout.session.completed`
    CheckoutCompleted(CheckoutSession),
    /// `checkout.session.async_payment_succeeded`
    AsyncPaymentSucceeded(CheckoutSession),
    /// `payment_intent.payment_failed`
    PaymentFailed(PaymentIntent),
    /// `payment_intent.succeeded`; backup for a lost checkout event.
    PaymentSucceeded(PaymentIntent),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    /// `client_reference_id`, else `metadata.order_id`.
    pub order_id: Option<Uuid>,
    pub payment_intent_id: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    /// `paid` | `unpaid` | `no_payment_required`
    pub payment_status: Option<String>,
}

impl CheckoutSession {
    /// False for delayed methods whose funds have not settled yet.
    pub fn is_settled(&self) -> bool {
        !matches!(self.payment_status.as_deref(), Some("unpaid"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub payment_intent_id: String,
    /// `metadata.order_id`, set when the checkout was created by us. Lets a
    /// backup event find its order before the intent id is on file.
    pub order_id: Option<Uuid>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub failure_message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("event envelope is not valid JSON: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("event {event_type} has an unexpected object shape: {source}")]
    Object {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: Value,
}

#[derive(Deserialize)]
struct RawCheckoutSession {
    id: String,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    payment_intent: Option<Value>,
    amount_total: Option<i64>,
    currency: Option<String>,
    customer_email: Option<String>,
    customer_details: Option<RawCustomerDetails>,
    payment_status: Option<String>,
}

#[derive(Deserialize)]
struct RawCustomerDetails {
    email: Option<String>,
}

#[derive(Deserialize)]
struct RawPaymentIntent {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    amount: Option<i64>,
    currency: Option<String>,
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    message: Option<String>,
}

pub fn parse_event(payload: &[u8]) -> Result<ProviderEvent, EventParseError> {
    let raw: RawEvent = serde_json::from_slice(payload).map_err(EventParseError::Envelope)?;

    let object_err = |source| EventParseError::Object {
        event_type: raw.event_type.clone(),
        source,
    };

    let kind = match raw.event_type.as_str() {
        "checkout.session.completed" => PaymentEvent::CheckoutCompleted(
            checkout_session(raw.data.object.clone()).map_err(object_err)?,
        ),
        "checkout.session.async_payment_succeeded" => PaymentEvent::AsyncPaymentSucceeded(
            checkout_session(raw.data.object.clone()).map_err(object_err)?,
        ),
        "payment_intent.payment_failed" => {
            PaymentEvent::PaymentFailed(payment_intent(raw.data.object.clone()).map_err(object_err)?)
        }
        "payment_intent.succeeded" => PaymentEvent::PaymentSucceeded(
            payment_intent(raw.data.object.clone()).map_err(object_err)?,
        ),
        _ => PaymentEvent::Ignored,
    };

    Ok(ProviderEvent {
        id: raw.id,
        event_type: raw.event_type,
        kind,
    })
}

fn checkout_session(object: Value) -> Result<CheckoutSession, serde_json::Error> {
    let raw: RawCheckoutSession = serde_json::from_value(object)?;

    let order_id = raw
        .client_reference_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .or_else(|| metadata_order_id(&raw.metadata));

    // Either a bare id or an expanded object carrying one.
    let payment_intent_id = match raw.payment_intent {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(map)) => map.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };

    let customer_email = raw
        .customer_details
        .and_then(|d| d.email)
        .or(raw.customer_email)
        .filter(|e| !e.trim().is_empty());

    Ok(CheckoutSession {
        session_id: raw.id,
        order_id,
        payment_intent_id,
        amount_total: raw.amount_total,
        currency: raw.currency,
        customer_email,
        payment_status: raw.payment_status,
    })
}

fn metadata_order_id(metadata: &HashMap<String, Value>) -> Option<Uuid> {
    ["order_id", "orderId"]
        .iter()
        .filter_map(|k| metadata.get(*k)?.as_str())
        .find_map(|s| Uuid::parse_str(s.trim()).ok())
}

fn payment_intent(object: Value) -> Result<PaymentIntent, serde_json::Error> {
    let raw: RawPaymentIntent = serde_json::from_value(object)?;
    Ok(PaymentIntent {
        order_id: metadata_order_id(&raw.metadata),
        payment_intent_id: raw.id,
        amount: raw.amount,
        currency: raw.currency,
        failure_message: raw.last_payment_error.and_then(|e| e.message),
    })
}
