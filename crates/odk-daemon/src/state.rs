//! Shared runtime state for odk-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The pool, token
//! issuers and collaborator seams are all cheap to clone or already behind
//! `Arc`.

use std::sync::Arc;

use anyhow::{Context, Result};
use odk_auth::{CsrfGuard, HmacSigner, MemoryCsrfStore, SessionTokens};
use odk_config::{ResolvedSecrets, ServiceSettings};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::notify::Notifier;
use crate::provider::PaymentProvider;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub settings: ServiceSettings,
    pub pool: PgPool,
    pub sessions: SessionTokens,
    pub csrf: CsrfGuard,
    pub provider: Arc<dyn PaymentProvider>,
    pub notifier: Arc<dyn Notifier>,
    /// Shared secret for webhook signature verification.
    pub webhook_secret: String,
}

impl AppState {
    pub fn new(
        settings: ServiceSettings,
        secrets: &ResolvedSecrets,
        pool: PgPool,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let signer = HmacSigner::new(secrets.session_signing_key.as_bytes())
            .context("session signing key rejected")?;
        let sessions = SessionTokens::with_ttl_secs(Arc::new(signer), settings.session_ttl_secs);
        let csrf = CsrfGuard::with_ttl_secs(Arc::new(MemoryCsrfStore::new()), settings.csrf_ttl_secs);

        Ok(Self {
            build: BuildInfo {
                service: "odk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            settings,
            pool,
            sessions,
            csrf,
            provider,
            notifier,
            webhook_secret: secrets.webhook_secret.clone(),
        })
    }

    /// Where the client lands after a successful hosted checkout.
    pub fn checkout_success_url(&self) -> String {
        format!(
            "{}/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.settings.public_base_url.trim_end_matches('/')
        )
    }

    pub fn checkout_cancel_url(&self, order_id: uuid::Uuid) -> String {
        format!(
            "{}/cancel?order_id={}",
            self.settings.public_base_url.trim_end_matches('/'),
            order_id
        )
    }

    pub fn upload_link(&self, token: &str) -> String {
        format!(
            "{}/upload?token={}",
            self.settings.public_base_url.trim_end_matches('/'),
            token
        )
    }
}
