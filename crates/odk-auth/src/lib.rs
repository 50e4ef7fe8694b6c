//! odk-auth
//!
//! Order-scoped credentials for anonymous visitors:
//! - [`session`]: stateless signed Session Tokens binding a bearer to one order.
//! - [`csrf`]: short-lived CSRF tokens bound to a subject, behind a store seam.
//! - [`upload_token`]: the exchange decision for emailed Upload Tokens.
//!
//! Pure logic plus one in-memory store. No DB, no HTTP.

use rand::RngCore;

pub mod csrf;
pub mod session;
pub mod upload_token;

pub use csrf::{CsrfEntry, CsrfGuard, CsrfStore, MemoryCsrfStore};
pub use session::{HmacSigner, SessionTokens, TokenSigner, SESSION_TOKEN_TYPE};
pub use upload_token::{ExchangeError, ExchangeKind, UploadTokenState};

/// 256 bits from the OS CSPRNG, hex encoded (64 chars).
pub fn random_token_hex() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_tokens_are_64_hex_chars_and_distinct() {
        let a = random_token_hex();
        let b = random_token_hex();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
