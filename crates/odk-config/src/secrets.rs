//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** under `/secrets_env`.
//! - At startup the daemon calls [`resolve_secrets`] once and passes the
//!   result into constructors; no other code reads these env vars.
//! - `Debug` output redacts every value.
//! - Error messages name the env var, never its value.
//!
//! All three secrets are required. A daemon that cannot sign session tokens
//! or verify webhook signatures must not start.

use anyhow::{bail, Result};
use serde_json::Value;

/// Minimum length of the session signing key, in bytes.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// HMAC key for session tokens.
    pub session_signing_key: String,
    /// Shared secret for payment webhook signatures.
    pub webhook_secret: String,
    /// Payment provider API key.
    pub provider_api_key: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("session_signing_key", &"<REDACTED>")
            .field("webhook_secret", &"<REDACTED>")
            .field("provider_api_key", &"<REDACTED>")
            .finish()
    }
}

struct SecretEnvNames {
    session_signing_key_var: String,
    webhook_secret_var: String,
    provider_api_key_var: String,
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn parse_env_names(config_json: &Value) -> SecretEnvNames {
    SecretEnvNames {
        session_signing_key_var: read_str_at(config_json, "/secrets_env/session_signing_key")
            .unwrap_or_else(|| "ODK_SESSION_SIGNING_KEY".to_string()),
        webhook_secret_var: read_str_at(config_json, "/secrets_env/webhook_secret")
            .unwrap_or_else(|| "ODK_WEBHOOK_SECRET".to_string()),
        provider_api_key_var: read_str_at(config_json, "/secrets_env/provider_api_key")
            .unwrap_or_else(|| "ODK_PROVIDER_API_KEY".to_string()),
    }
}

fn require(var_name: &str, what: &str) -> Result<String> {
    match resolve_env(var_name) {
        Some(v) => Ok(v),
        None => bail!("SECRETS_MISSING: required env var '{var_name}' ({what}) is not set or empty"),
    }
}

/// Resolve all daemon secrets from the environment.
///
/// # Errors
/// The first missing secret, reported by env var NAME. A session signing key
/// shorter than [`MIN_SIGNING_KEY_LEN`] bytes is also refused.
pub fn resolve_secrets(config_json: &Value) -> Result<ResolvedSecrets> {
    let names = parse_env_names(config_json);

    let session_signing_key = require(&names.session_signing_key_var, "session signing key")?;
    if session_signing_key.len() < MIN_SIGNING_KEY_LEN {
        bail!(
            "SECRETS_WEAK: env var '{}' (session signing key) must be at least {} bytes",
            names.session_signing_key_var,
            MIN_SIGNING_KEY_LEN
        );
    }
    let webhook_secret = require(&names.webhook_secret_var, "webhook secret")?;
    let provider_api_key = require(&names.provider_api_key_var, "payment provider api key")?;

    Ok(ResolvedSecrets {
        session_signing_key,
        webhook_secret,
        provider_api_key,
    })
}
