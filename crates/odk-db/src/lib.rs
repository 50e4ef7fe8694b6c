//! odk-db
//!
//! Postgres persistence for orders, uploads, upload tokens and payment
//! reconciliation. Every state-changing path that needs serialisation per
//! order takes `SELECT ... FOR UPDATE` on the order row inside the caller's
//! transaction.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

pub mod orders;
pub mod payments;
pub mod upload_tokens;
pub mod uploads;

pub use orders::{
    fetch_order, insert_order, set_checkout_session, submit_order_fields, OrderRow, OrderStatus,
    SubmitOrder,
};
pub use payments::{
    apply_payment_event, record_payment_event, AppliedPayment, ApplyOutcome, PaymentApplyError,
    CONFIRMATION_CONSTRAINT,
};
pub use upload_tokens::{create_upload_token, fetch_upload_token, mark_upload_token_used, UploadTokenRow};
pub use uploads::{
    advisory_upload_quota, count_uploads, insert_upload, reserve_upload_slot, DenyReason, NewUpload,
    QuotaDecision, QuotaError,
};

pub const ENV_DB_URL: &str = "ODK_DATABASE_URL";

const MAX_CONNECTIONS: u32 = 10;
const STATEMENT_TIMEOUT: &str = "30s";
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to Postgres using ODK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Connect with the service pool settings (max 10 connections, 30 s
/// statement timeout on every connection).
pub async fn connect(url: &str) -> Result<PgPool> {
    let opts = connect_options(url)?;
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(opts)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Build a pool that connects on first use. Handlers that never touch the
/// database work without a reachable server.
pub fn connect_lazy(url: &str) -> Result<PgPool> {
    let opts = connect_options(url)?;
    Ok(PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy_with(opts))
}

fn connect_options(url: &str) -> Result<PgConnectOptions> {
    let opts: PgConnectOptions = url.parse().context("invalid Postgres connection url")?;
    Ok(opts.options([("statement_timeout", STATEMENT_TIMEOUT)]))
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
    })
}

/// Detect a Postgres unique constraint violation (23505) by constraint name.
pub fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_reject_garbage_urls() {
        assert!(connect_options("not a url").is_err());
    }

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_constraint_violation(
            &sqlx::Error::RowNotFound,
            CONFIRMATION_CONSTRAINT
        ));
    }
}
