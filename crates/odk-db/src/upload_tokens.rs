//! Upload token rows. The accept/reject decision is
//! `odk_auth::upload_token::evaluate`; this module only stores and loads.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use odk_auth::UploadTokenState;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UploadTokenRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UploadTokenRow {
    pub fn state(&self) -> UploadTokenState {
        UploadTokenState {
            expires_at: self.expires_at,
            used_at: self.used_at,
        }
    }
}

pub async fn create_upload_token(
    conn: &mut PgConnection,
    order_id: Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        insert into upload_tokens (id, order_id, token, expires_at)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(order_id)
    .bind(token)
    .bind(expires_at)
    .execute(conn)
    .await
    .context("create_upload_token failed")?;
    Ok(id)
}

pub async fn fetch_upload_token(pool: &PgPool, token: &str) -> Result<Option<UploadTokenRow>> {
    let row = sqlx::query(
        r#"
        select id, order_id, token, expires_at, used_at, created_at
        from upload_tokens
        where token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("fetch_upload_token failed")?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(UploadTokenRow {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        token: row.try_get("token")?,
        expires_at: row.try_get("expires_at")?,
        used_at: row.try_get("used_at")?,
        created_at: row.try_get("created_at")?,
    }))
}

/// Stamp first use. Later uses keep the original timestamp.
pub async fn mark_upload_token_used(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        update upload_tokens
        set used_at = coalesce(used_at, $2)
        where id = $1
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await
    .context("mark_upload_token_used failed")?;
    Ok(())
}
