//! Payment provider seam.
//!
//! `PaymentProvider` is what the routes talk to; `StripeProvider` is the
//! production implementation over reqwest. The API key is passed in by the
//! caller and never logged.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use uuid::Uuid;

/// Everything the provider needs to open a hosted checkout for one order.
#[derive(Debug, Clone)]
pub struct NewCheckout {
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub product_name: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCheckout {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub session_id: String,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub customer_email: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub order_id: Option<Uuid>,
}

#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_checkout_session(&self, req: &NewCheckout) -> Result<CreatedCheckout>;

    async fn retrieve_session(&self, session_id: &str) -> Result<ProviderSession>;
}

/// Provider ids are short ASCII tokens (`cs_test_...`). Anything else is
/// refused before it reaches a URL path.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 255 && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[derive(Clone)]
pub struct StripeProvider {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for StripeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl StripeProvider {
    pub fn new(api_key: String) -> Self {
        Self::new_with_base_url(api_key, "https://api.stripe.com".to_string())
    }

    pub fn new_with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(&self, req: &NewCheckout) -> Result<CreatedCheckout> {
        let order_id = req.order_id.to_string();
        let amount = req.amount_cents.to_string();

        let mut form: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("client_reference_id", order_id.as_str()),
            ("success_url", req.success_url.as_str()),
            ("cancel_url", req.cancel_url.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", req.currency.as_str()),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            ("line_items[0][price_data][product_data][name]", req.product_name.as_str()),
            ("metadata[order_id]", order_id.as_str()),
            ("payment_intent_data[metadata][order_id]", order_id.as_str()),
        ];
        if let Some(email) = req.customer_email.as_deref() {
            form.push(("customer_email", email));
        }

        let resp = self
            .http
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await
            .context("stripe create checkout session request failed")?;

        let body: StripeSession = decode(resp, "create checkout session").await?;
        Ok(CreatedCheckout {
            session_id: body.id,
            url: body.url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<ProviderSession> {
        if !is_valid_session_id(session_id) {
            return Err(anyhow!("invalid checkout session id"));
        }

        let resp = self
            .http
            .get(self.url(&format!("/v1/checkout/sessions/{session_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("stripe retrieve checkout session request failed")?;

        let body: StripeSession = decode(resp, "retrieve checkout session").await?;
        let order_id = body
            .client_reference_id
            .as_deref()
            .or_else(|| body.metadata.as_ref()?.order_id.as_deref())
            .and_then(|s| Uuid::parse_str(s).ok());

        Ok(ProviderSession {
            session_id: body.id,
            status: body.status,
            payment_status: body.payment_status,
            customer_email: body.customer_details.and_then(|d| d.email).or(body.customer_email),
            amount_total: body.amount_total,
            currency: body.currency,
            order_id,
        })
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response, op: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp
            .json::<StripeErrorEnvelope>()
            .await
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| "unknown".to_string());
        return Err(anyhow!(
            "stripe {} http error status={} message={}",
            op,
            status.as_u16(),
            message
        ));
    }
    resp.json::<T>()
        .await
        .with_context(|| format!("stripe {op} response json decode failed"))
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    client_reference_id: Option<String>,
    metadata: Option<StripeMetadata>,
    customer_email: Option<String>,
    customer_details: Option<StripeCustomerDetails>,
    amount_total: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeMetadata {
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: Option<String>,
}
