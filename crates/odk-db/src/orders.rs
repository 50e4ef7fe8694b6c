use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use odk_reconcile::PaymentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Created,
    Submitted,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "submitted" => Ok(OrderStatus::Submitted),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(anyhow!("invalid order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRow {
    pub id: Uuid,
    pub status: OrderStatus,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub property_type: Option<String>,
    pub notes: Option<String>,
    pub paid: bool,
    pub payment_status: PaymentStatus,
    pub confirmation_number: Option<String>,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_total_cents: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact/property fields captured by submission. Validation happens
/// before this reaches the database.
#[derive(Debug, Clone)]
pub struct SubmitOrder {
    pub contact_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub property_type: Option<String>,
    pub notes: Option<String>,
}

/// Create an empty order (status `created`, unpaid).
pub async fn insert_order(pool: &PgPool) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("insert into orders (id) values ($1)")
        .bind(id)
        .execute(pool)
        .await
        .context("insert_order failed")?;
    Ok(id)
}

pub async fn fetch_order(pool: &PgPool, id: Uuid) -> Result<Option<OrderRow>> {
    let row = sqlx::query(
        r#"
        select
          id, status, contact_name, email, phone, street, postal_code, city,
          property_type, notes, paid, payment_status, confirmation_number,
          checkout_session_id, payment_intent_id, amount_total_cents, currency,
          customer_email, paid_at, submitted_at, created_at, updated_at
        from orders
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("fetch_order failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let payment_status: String = row.try_get("payment_status")?;
    Ok(Some(OrderRow {
        id: row.try_get("id")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
        contact_name: row.try_get("contact_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        street: row.try_get("street")?,
        postal_code: row.try_get("postal_code")?,
        city: row.try_get("city")?,
        property_type: row.try_get("property_type")?,
        notes: row.try_get("notes")?,
        paid: row.try_get("paid")?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or_else(|| anyhow!("invalid payment status: {}", payment_status))?,
        confirmation_number: row.try_get("confirmation_number")?,
        checkout_session_id: row.try_get("checkout_session_id")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        amount_total_cents: row.try_get("amount_total_cents")?,
        currency: row.try_get("currency")?,
        customer_email: row.try_get("customer_email")?,
        paid_at: row.try_get("paid_at")?,
        submitted_at: row.try_get("submitted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

/// Persist submitted fields and move `created -> submitted`. A paid order
/// keeps its status; resubmission only refreshes the contact fields.
///
/// Returns false when the order does not exist.
pub async fn submit_order_fields(conn: &mut PgConnection, id: Uuid, form: &SubmitOrder) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update orders
        set contact_name  = $2,
            email         = $3,
            phone         = $4,
            street        = $5,
            postal_code   = $6,
            city          = $7,
            property_type = $8,
            notes         = $9,
            status        = case when status = 'created' then 'submitted' else status end,
            submitted_at  = coalesce(submitted_at, now()),
            updated_at    = now()
        where id = $1
        "#,
    )
    .bind(id)
    .bind(&form.contact_name)
    .bind(&form.email)
    .bind(&form.phone)
    .bind(&form.street)
    .bind(&form.postal_code)
    .bind(&form.city)
    .bind(&form.property_type)
    .bind(&form.notes)
    .execute(conn)
    .await
    .context("submit_order_fields failed")?;

    Ok(res.rows_affected() == 1)
}

/// Remember the provider checkout session created for this order.
pub async fn set_checkout_session(pool: &PgPool, id: Uuid, checkout_session_id: &str) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update orders
        set checkout_session_id = $2,
            updated_at = now()
        where id = $1
        "#,
    )
    .bind(id)
    .bind(checkout_session_id)
    .execute(pool)
    .await
    .context("set_checkout_session failed")?;

    Ok(res.rows_affected() == 1)
}
