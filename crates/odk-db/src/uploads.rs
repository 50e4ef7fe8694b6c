//! Upload quota reservation.
//!
//! `reserve_upload_slot` locks the order row, counts, and decides. The caller
//! inserts with `insert_upload` on the same transaction and commits, so two
//! concurrent reservations for one order serialise on the row lock and the
//! second one sees the first one's insert.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The order already holds `max_uploads` uploads.
    Exhausted,
    /// The check itself failed; treated as a denial.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub current_count: i64,
    pub max_uploads: i64,
    pub deny_reason: Option<DenyReason>,
    pub message: Option<String>,
}

impl QuotaDecision {
    fn allowed(current_count: i64, max_uploads: i64) -> Self {
        Self {
            allowed: true,
            current_count,
            max_uploads,
            deny_reason: None,
            message: None,
        }
    }

    fn denied(reason: DenyReason, current_count: i64, max_uploads: i64, message: String) -> Self {
        Self {
            allowed: false,
            current_count,
            max_uploads,
            deny_reason: Some(reason),
            message: Some(message),
        }
    }

    pub fn remaining(&self) -> i64 {
        (self.max_uploads - self.current_count).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
}

#[derive(Debug, Clone)]
pub struct NewUpload {
    pub order_id: Uuid,
    pub area: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
}

/// Lock the order row and decide whether one more upload fits.
///
/// Database errors fail closed: they yield a denial (`DenyReason::Unavailable`)
/// rather than an admission. The transaction is then unusable and the caller
/// must roll back.
pub async fn reserve_upload_slot(
    conn: &mut PgConnection,
    order_id: Uuid,
    max_uploads: i64,
) -> Result<QuotaDecision, QuotaError> {
    let locked = sqlx::query_as::<_, (Uuid,)>("select id from orders where id = $1 for update")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await;

    match locked {
        Ok(Some(_)) => {}
        Ok(None) => return Err(QuotaError::OrderNotFound(order_id)),
        Err(e) => {
            tracing::error!(order_id = %order_id, error = %e, "upload quota lock failed");
            return Ok(unavailable(max_uploads));
        }
    }

    let count = sqlx::query_as::<_, (i64,)>(
        "select count(*)::bigint from uploads where order_id = $1",
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await;

    let current_count = match count {
        Ok((n,)) => n,
        Err(e) => {
            tracing::error!(order_id = %order_id, error = %e, "upload quota count failed");
            return Ok(unavailable(max_uploads));
        }
    };

    Ok(decide(current_count, max_uploads))
}

fn unavailable(max_uploads: i64) -> QuotaDecision {
    QuotaDecision::denied(
        DenyReason::Unavailable,
        0,
        max_uploads,
        "upload quota could not be checked".to_string(),
    )
}

fn decide(current_count: i64, max_uploads: i64) -> QuotaDecision {
    if current_count >= max_uploads {
        QuotaDecision::denied(
            DenyReason::Exhausted,
            current_count,
            max_uploads,
            format!("upload limit reached: {current_count} of {max_uploads} files already uploaded"),
        )
    } else {
        QuotaDecision::allowed(current_count, max_uploads)
    }
}

/// Insert an upload row. Call only after `reserve_upload_slot` allowed it
/// on the same transaction.
pub async fn insert_upload(conn: &mut PgConnection, upload: &NewUpload) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        insert into uploads (id, order_id, area, file_path, mime_type, file_size)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(upload.order_id)
    .bind(&upload.area)
    .bind(&upload.file_path)
    .bind(&upload.mime_type)
    .bind(upload.file_size)
    .execute(conn)
    .await
    .context("insert_upload failed")?;
    Ok(id)
}

pub async fn count_uploads(pool: &PgPool, order_id: Uuid) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        "select count(*)::bigint from uploads where order_id = $1",
    )
    .bind(order_id)
    .fetch_one(pool)
    .await
    .context("count_uploads failed")?;
    Ok(n)
}

/// Lock-free quota hint for the UI. Never gates an insert.
pub async fn advisory_upload_quota(pool: &PgPool, order_id: Uuid, max_uploads: i64) -> Result<QuotaDecision> {
    let n = count_uploads(pool, order_id).await?;
    Ok(decide(n, max_uploads))
}
