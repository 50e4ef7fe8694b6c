//! Session Tokens.
//!
//! A Session Token is `base64url(claims) "." base64url(mac)` where the MAC is
//! computed over the encoded claims segment. Claims carry the order id, the
//! fixed type discriminator [`SESSION_TOKEN_TYPE`], and issue/expiry times.
//!
//! Verification is pure: no store lookup, and every malformed input maps to
//! `None`. Signing is behind [`TokenSigner`] so keys can rotate and tests can
//! run without real key material.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Type discriminator embedded in every session token.
pub const SESSION_TOKEN_TYPE: &str = "order_session";

pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Tokens longer than this are rejected before any decoding.
const MAX_TOKEN_LEN: usize = 2048;

/// Tolerated clock skew for `iat` in the future.
const MAX_IAT_SKEW_SECS: i64 = 60;

/// Signs and verifies token payloads.
pub trait TokenSigner: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Vec<u8>;

    /// Must compare in constant time.
    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool;
}

/// HMAC-SHA256 signer.
#[derive(Clone)]
pub struct HmacSigner {
    mac: HmacSha256,
}

impl HmacSigner {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            bail!("session signing key must not be empty");
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|_| anyhow!("session signing key rejected by HMAC"))?;
        Ok(Self { mac })
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HmacSigner(<REDACTED>)")
    }
}

impl TokenSigner for HmacSigner {
    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct SessionClaims {
    #[serde(rename = "orderId")]
    order_id: Uuid,
    #[serde(rename = "type")]
    typ: String,
    iat: i64,
    exp: i64,
}

/// Issuer/verifier for order Session Tokens.
#[derive(Clone)]
pub struct SessionTokens {
    signer: Arc<dyn TokenSigner>,
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self::with_ttl_secs(signer, DEFAULT_SESSION_TTL_SECS)
    }

    pub fn with_ttl_secs(signer: Arc<dyn TokenSigner>, ttl_secs: i64) -> Self {
        Self {
            signer,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, order_id: Uuid) -> String {
        self.issue_at(order_id, Utc::now())
    }

    pub fn issue_at(&self, order_id: Uuid, now: DateTime<Utc>) -> String {
        let claims = serde_json::json!({
            "orderId": order_id,
            "type": SESSION_TOKEN_TYPE,
            "iat": now.timestamp(),
            "exp": now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC).timestamp(),
        });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mac = URL_SAFE_NO_PAD.encode(self.signer.sign(payload.as_bytes()));
        format!("{payload}.{mac}")
    }

    /// The order id the token is bound to, or `None` for anything invalid.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Option<Uuid> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return None;
        }
        let (payload, mac) = token.split_once('.')?;
        if mac.contains('.') {
            return None;
        }

        let mac = URL_SAFE_NO_PAD.decode(mac).ok()?;
        if !self.signer.verify(payload.as_bytes(), &mac) {
            return None;
        }

        let raw = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let claims: SessionClaims = serde_json::from_slice(&raw).ok()?;
        if claims.typ != SESSION_TOKEN_TYPE {
            return None;
        }

        let now_s = now.timestamp();
        if now_s >= claims.exp || claims.iat > now_s + MAX_IAT_SKEW_SECS {
            return None;
        }
        Some(claims.order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> SessionTokens {
        let signer = HmacSigner::new(b"unit-test-signing-key-0123456789abcdef").unwrap();
        SessionTokens::new(Arc::new(signer))
    }

    #[test]
    fn issued_token_verifies_to_its_order() {
        let t = tokens();
        let order_id = Uuid::new_v4();
        assert_eq!(t.verify(&t.issue(order_id)), Some(order_id));
    }

    #[test]
    fn token_is_invalid_at_and_after_expiry() {
        let t = tokens();
        let order_id = Uuid::new_v4();
        let issued = Utc::now();
        let token = t.issue_at(order_id, issued);

        let almost = issued + Duration::hours(24) - Duration::seconds(1);
        assert_eq!(t.verify_at(&token, almost), Some(order_id));
        assert_eq!(t.verify_at(&token, issued + Duration::hours(24)), None);
        assert_eq!(t.verify_at(&token, issued + Duration::days(3)), None);
    }

    #[test]
    fn token_signed_with_another_key_is_rejected() {
        let other = SessionTokens::new(Arc::new(
            HmacSigner::new(b"a-completely-different-signing-key!!").unwrap(),
        ));
        let token = other.issue(Uuid::new_v4());
        assert_eq!(tokens().verify(&token), None);
    }

    #[test]
    fn swapping_the_claims_segment_breaks_the_signature() {
        let t = tokens();
        let a = t.issue(Uuid::new_v4());
        let b = t.issue(Uuid::new_v4());
        let (payload_b, _) = b.split_once('.').unwrap();
        let (_, mac_a) = a.split_once('.').unwrap();
        assert_eq!(t.verify(&format!("{payload_b}.{mac_a}")), None);
    }

    #[test]
    fn wrong_type_discriminator_is_rejected() {
        let t = tokens();
        let claims = serde_json::json!({
            "orderId": Uuid::new_v4(),
            "type": "admin_session",
            "iat": Utc::now().timestamp(),
            "exp": Utc::now().timestamp() + 3600,
        });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mac = URL_SAFE_NO_PAD.encode(t.signer.sign(payload.as_bytes()));
        assert_eq!(t.verify(&format!("{payload}.{mac}")), None);
    }

    #[test]
    fn garbage_input_never_panics() {
        let t = tokens();
        let long = "a".repeat(10_000);
        for input in [
            "",
            ".",
            "..",
            "abc",
            "abc.def",
            "abc.def.ghi",
            "!!!.???",
            "\u{0}\u{1}.\u{2}",
            "eyJvcmRlcklkIjoxfQ.AAAA",
            long.as_str(),
        ] {
            assert_eq!(t.verify(input), None, "input {input:?} must be invalid");
        }
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let signer = HmacSigner::new(b"unit-test-signing-key-0123456789abcdef").unwrap();
        let t = SessionTokens::with_ttl_secs(Arc::new(signer), 10_000_000_000_000);
        let order_id = Uuid::new_v4();
        assert_eq!(t.verify(&t.issue(order_id)), Some(order_id));
    }

    #[test]
    fn empty_key_is_refused() {
        assert!(HmacSigner::new(b"").is_err());
    }
}
