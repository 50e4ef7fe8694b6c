//! Typed service settings read from the merged config JSON.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every JSON pointer the daemon reads. Leaves outside these prefixes are
/// reported by [`crate::unused_leaf_pointers`].
pub const CONSUMED_POINTERS: &[&str] = &[
    "/server/bind_addr",
    "/server/public_base_url",
    "/uploads/max_per_order",
    "/tokens/session_ttl_secs",
    "/tokens/upload_token_ttl_secs",
    "/tokens/csrf_ttl_secs",
    "/payment/amount_cents",
    "/payment/currency",
    "/payment/product_name",
    "/payment/provider_base_url",
    "/payment/webhook_tolerance_secs",
    "/payment/confirmation_prefix",
    "/secrets_env",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub bind_addr: SocketAddr,
    /// Origin used to build checkout success/cancel URLs.
    pub public_base_url: String,
    pub max_uploads_per_order: i64,
    pub session_ttl_secs: i64,
    pub upload_token_ttl_secs: i64,
    pub csrf_ttl_secs: i64,
    /// Price of one order in the smallest currency unit.
    pub amount_cents: i64,
    pub currency: String,
    pub product_name: String,
    pub provider_base_url: String,
    pub webhook_tolerance_secs: i64,
    pub confirmation_prefix: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            public_base_url: "http://localhost:3000".to_string(),
            max_uploads_per_order: 20,
            session_ttl_secs: 24 * 60 * 60,
            upload_token_ttl_secs: 7 * 24 * 60 * 60,
            csrf_ttl_secs: 60 * 60,
            amount_cents: 4900,
            currency: "eur".to_string(),
            product_name: "Order".to_string(),
            provider_base_url: "https://api.stripe.com".to_string(),
            webhook_tolerance_secs: 300,
            confirmation_prefix: "OD".to_string(),
        }
    }
}

impl ServiceSettings {
    /// Read settings from a merged config, using defaults for absent keys.
    ///
    /// Present-but-invalid values are an error, never silently defaulted.
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let d = Self::default();

        let bind_addr = match read_str(config_json, "/server/bind_addr")? {
            Some(s) => s
                .parse()
                .with_context(|| format!("invalid /server/bind_addr: {s}"))?,
            None => d.bind_addr,
        };

        let settings = Self {
            bind_addr,
            public_base_url: read_str(config_json, "/server/public_base_url")?
                .unwrap_or(d.public_base_url),
            max_uploads_per_order: read_positive(config_json, "/uploads/max_per_order")?
                .unwrap_or(d.max_uploads_per_order),
            session_ttl_secs: read_duration_secs(config_json, "/tokens/session_ttl_secs")?
                .unwrap_or(d.session_ttl_secs),
            upload_token_ttl_secs: read_duration_secs(config_json, "/tokens/upload_token_ttl_secs")?
                .unwrap_or(d.upload_token_ttl_secs),
            csrf_ttl_secs: read_duration_secs(config_json, "/tokens/csrf_ttl_secs")?
                .unwrap_or(d.csrf_ttl_secs),
            amount_cents: read_positive(config_json, "/payment/amount_cents")?
                .unwrap_or(d.amount_cents),
            currency: read_str(config_json, "/payment/currency")?
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or(d.currency),
            product_name: read_str(config_json, "/payment/product_name")?
                .unwrap_or(d.product_name),
            provider_base_url: read_str(config_json, "/payment/provider_base_url")?
                .unwrap_or(d.provider_base_url),
            webhook_tolerance_secs: read_duration_secs(config_json, "/payment/webhook_tolerance_secs")?
                .unwrap_or(d.webhook_tolerance_secs),
            confirmation_prefix: read_str(config_json, "/payment/confirmation_prefix")?
                .unwrap_or(d.confirmation_prefix),
        };

        if settings.currency.len() != 3 {
            bail!(
                "invalid /payment/currency: expected ISO-4217 code, got '{}'",
                settings.currency
            );
        }

        Ok(settings)
    }
}

fn read_str(config: &Value, pointer: &str) -> Result<Option<String>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => bail!("invalid {pointer}: expected string, got {other}"),
    }
}

/// Upper bound for every configured duration (ten years). Token expiry is
/// computed as `now + ttl`, which must stay inside chrono's range.
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

fn read_duration_secs(config: &Value, pointer: &str) -> Result<Option<i64>> {
    match read_positive(config, pointer)? {
        Some(n) if n > MAX_DURATION_SECS => {
            bail!("invalid {pointer}: {n} exceeds the maximum of {MAX_DURATION_SECS} seconds")
        }
        other => Ok(other),
    }
}

fn read_positive(config: &Value, pointer: &str) -> Result<Option<i64>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if n > 0 => Ok(Some(n)),
            _ => bail!("invalid {pointer}: expected positive integer, got {v}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_yields_defaults() {
        let s = ServiceSettings::from_config_json(&json!({})).unwrap();
        assert_eq!(s, ServiceSettings::default());
        assert_eq!(s.session_ttl_secs, 86_400);
        assert_eq!(s.upload_token_ttl_secs, 604_800);
        assert_eq!(s.csrf_ttl_secs, 3_600);
    }

    #[test]
    fn zero_upload_limit_is_rejected() {
        let err = ServiceSettings::from_config_json(&json!({"uploads": {"max_per_order": 0}}))
            .unwrap_err();
        assert!(err.to_string().contains("/uploads/max_per_order"));
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let err = ServiceSettings::from_config_json(&json!({
            "tokens": {"session_ttl_secs": 10_000_000_000_000_i64}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid /tokens/session_ttl_secs"), "{err}");

        let s = ServiceSettings::from_config_json(&json!({
            "tokens": {"upload_token_ttl_secs": MAX_DURATION_SECS}
        }))
        .unwrap();
        assert_eq!(s.upload_token_ttl_secs, MAX_DURATION_SECS);
    }

    #[test]
    fn currency_is_lowercased() {
        let s = ServiceSettings::from_config_json(&json!({"payment": {"currency": "EUR"}}))
            .unwrap();
        assert_eq!(s.currency, "eur");
    }
}
