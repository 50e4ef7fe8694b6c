//! Webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`.
//! The MAC is HMAC-SHA256 keyed with the shared secret over
//! `"<t>." ++ raw body`. Unknown schemes (e.g. `v0`) are ignored.
//!
//! Fail closed: a header that cannot be parsed, a timestamp outside the
//! tolerance window, or no matching `v1` entry are all rejections.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum age (and future skew) of a signed timestamp.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("webhook secret is empty")]
    EmptySecret,
    #[error("signature header missing or malformed")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance (age {age_secs}s)")]
    TimestampOutOfTolerance { age_secs: i64 },
    #[error("no signature matches the payload")]
    Mismatch,
}

fn keyed_mac(secret: &str, timestamp: i64) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::EmptySecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    Ok(mac)
}

/// Verify `payload` against the signature header value.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((k, v)) = part.trim().split_once('=') else {
            continue;
        };
        match k {
            "t" => timestamp = v.parse().ok(),
            // A v1 entry that is not valid hex can never match; skip it.
            "v1" => {
                if let Ok(sig) = hex::decode(v) {
                    candidates.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    let age_secs = now_unix - timestamp;
    if age_secs.abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance { age_secs });
    }

    let mut mac = keyed_mac(secret, timestamp)?;
    mac.update(payload);

    let matched = candidates
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a header value for `payload`, as the provider would.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let mut mac = keyed_mac(secret, timestamp)?;
    mac.update(payload);
    let sig = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={sig}"))
}
