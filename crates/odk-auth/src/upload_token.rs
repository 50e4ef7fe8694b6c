//! Upload Token exchange decision.
//!
//! An Upload Token is emailed after submission and exchanged for a fresh
//! Session Token + CSRF token. It is reload tolerant: exchange keeps
//! succeeding after first use until `expires_at`. Expiry wins over everything
//! else, including prior use.
//!
//! Persistence lives in `odk-db`; this module only decides.

use chrono::{DateTime, Duration, Utc};

use crate::random_token_hex;

pub const DEFAULT_UPLOAD_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// New high-entropy token value.
pub fn generate_upload_token() -> String {
    random_token_hex()
}

pub fn expiry_from(now: DateTime<Utc>, ttl_secs: i64) -> DateTime<Utc> {
    now.checked_add_signed(Duration::seconds(ttl_secs))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTokenState {
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Caller must stamp `used_at = now`.
    FirstUse,
    /// Already used, still within validity. `used_at` is left alone.
    Reuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("upload token not found")]
    NotFound,
    #[error("upload token expired")]
    Expired,
}

pub fn evaluate(
    state: Option<&UploadTokenState>,
    now: DateTime<Utc>,
) -> Result<ExchangeKind, ExchangeError> {
    let state = state.ok_or(ExchangeError::NotFound)?;
    if now >= state.expires_at {
        return Err(ExchangeError::Expired);
    }
    Ok(match state.used_at {
        None => ExchangeKind::FirstUse,
        Some(_) => ExchangeKind::Reuse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_is_not_found() {
        assert_eq!(evaluate(None, Utc::now()), Err(ExchangeError::NotFound));
    }

    #[test]
    fn unused_valid_token_is_first_use() {
        let now = Utc::now();
        let st = UploadTokenState {
            expires_at: expiry_from(now, DEFAULT_UPLOAD_TOKEN_TTL_SECS),
            used_at: None,
        };
        assert_eq!(evaluate(Some(&st), now), Ok(ExchangeKind::FirstUse));
    }

    #[test]
    fn used_valid_token_is_still_accepted() {
        let now = Utc::now();
        let st = UploadTokenState {
            expires_at: now + Duration::days(6),
            used_at: Some(now - Duration::days(1)),
        };
        assert_eq!(evaluate(Some(&st), now), Ok(ExchangeKind::Reuse));
    }

    #[test]
    fn expiry_wins_regardless_of_use() {
        let now = Utc::now();
        for used_at in [None, Some(now - Duration::days(2))] {
            let st = UploadTokenState {
                expires_at: now,
                used_at,
            };
            assert_eq!(evaluate(Some(&st), now), Err(ExchangeError::Expired));
        }
    }
}
