//! Customer notification seam.
//!
//! Callers log and swallow notifier errors; a failed notification never
//! changes an HTTP response.

use anyhow::Result;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SubmissionNotice {
    pub order_id: Uuid,
    pub contact_name: String,
    pub email: String,
    /// Link that exchanges the upload token for a session.
    pub upload_link: String,
}

#[derive(Debug, Clone)]
pub struct PaymentNotice {
    pub order_id: Uuid,
    pub email: Option<String>,
    pub contact_name: Option<String>,
    pub confirmation_number: Option<String>,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn order_submitted(&self, notice: &SubmissionNotice) -> Result<()>;

    async fn payment_confirmed(&self, notice: &PaymentNotice) -> Result<()>;
}

/// Emits structured log lines in place of email delivery.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn order_submitted(&self, notice: &SubmissionNotice) -> Result<()> {
        tracing::info!(order_id = %notice.order_id, to = %notice.email, "notify: order submitted");
        // The link embeds a bearer credential.
        tracing::debug!(order_id = %notice.order_id, upload_link = %notice.upload_link, "notify: upload link");
        Ok(())
    }

    async fn payment_confirmed(&self, notice: &PaymentNotice) -> Result<()> {
        tracing::info!(
            order_id = %notice.order_id,
            to = notice.email.as_deref().unwrap_or("-"),
            confirmation_number = notice.confirmation_number.as_deref().unwrap_or("-"),
            "notify: payment confirmed"
        );
        Ok(())
    }
}
