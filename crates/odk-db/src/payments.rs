//! Locked application of provider payment events.
//!
//! One delivery = one transaction:
//! 1. lock the order row (`FOR UPDATE`), located by order id or payment intent id;
//! 2. record the provider event id in `payment_events` (duplicate => no-op);
//! 3. `odk_reconcile::plan` the transition against the locked state and apply it;
//! 4. commit.
//!
//! Notification is the caller's job, after commit, and only when the outcome
//! says this delivery performed `unpaid -> paid`.
//!
//! A success event whose order cannot be found is an error, so the provider
//! redelivers it. A failure event for an unknown order is acknowledged.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use odk_reconcile::{
    new_confirmation_number, plan, CheckoutSession, OrderPaymentState, PaymentEvent, PaymentIntent,
    PaymentSignal, PaymentStatus, ProviderEvent, Transition, MAX_ALLOCATION_ATTEMPTS,
};
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::is_unique_constraint_violation;

pub const CONFIRMATION_CONSTRAINT: &str = "uq_orders_confirmation_number";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Event type the reconciler does not act on. No database access.
    Ignored,
    /// Event id already recorded by an earlier delivery.
    Duplicate,
    /// A failure event for which no order matches. Nothing is recorded.
    OrderNotFound { reference: String },
    Applied(AppliedPayment),
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentApplyError {
    /// A success event references no known order. Nothing is recorded, so a
    /// redelivery is evaluated again.
    #[error("no order matches payment reference {reference}")]
    OrderNotFound { reference: String },
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPayment {
    pub order_id: Uuid,
    pub transition: Transition,
    /// Number held by the order after this delivery.
    pub confirmation_number: Option<String>,
    /// Order email, else the email the provider collected.
    pub notify_email: Option<String>,
    pub contact_name: Option<String>,
}

impl AppliedPayment {
    pub fn notifies_customer(&self) -> bool {
        self.transition.notifies_customer()
    }
}

/// Payment details carried by an event; merged into the order without
/// overwriting values already present.
#[derive(Debug, Default)]
struct PaymentDetails {
    checkout_session_id: Option<String>,
    payment_intent_id: Option<String>,
    amount_total_cents: Option<i64>,
    currency: Option<String>,
    customer_email: Option<String>,
}

impl From<&CheckoutSession> for PaymentDetails {
    fn from(s: &CheckoutSession) -> Self {
        Self {
            checkout_session_id: Some(s.session_id.clone()),
            payment_intent_id: s.payment_intent_id.clone(),
            amount_total_cents: s.amount_total,
            currency: s.currency.clone(),
            customer_email: s.customer_email.clone(),
        }
    }
}

impl From<&PaymentIntent> for PaymentDetails {
    fn from(p: &PaymentIntent) -> Self {
        Self {
            payment_intent_id: Some(p.payment_intent_id.clone()),
            amount_total_cents: p.amount,
            currency: p.currency.clone(),
            ..Self::default()
        }
    }
}

enum Locator<'a> {
    OrderId(Uuid),
    /// Intent id first; the order id from intent metadata when the intent id
    /// is not on file yet (the checkout event that records it was lost).
    PaymentIntent {
        id: &'a str,
        order_id: Option<Uuid>,
    },
}

struct LockedOrder {
    id: Uuid,
    paid: bool,
    payment_status: PaymentStatus,
    confirmation_number: Option<String>,
    email: Option<String>,
    customer_email: Option<String>,
    contact_name: Option<String>,
}

impl LockedOrder {
    fn state(&self) -> OrderPaymentState {
        OrderPaymentState {
            paid: self.paid,
            payment_status: self.payment_status,
            has_confirmation_number: self.confirmation_number.is_some(),
        }
    }
}

/// Apply one verified provider event.
///
/// `Err` means nothing was committed and the provider should redeliver.
pub async fn apply_payment_event(
    pool: &PgPool,
    event: &ProviderEvent,
    confirmation_prefix: &str,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome, PaymentApplyError> {
    let (signal, details, locator, reference) = match &event.kind {
        PaymentEvent::CheckoutCompleted(s) | PaymentEvent::AsyncPaymentSucceeded(s) => {
            let signal = match (&event.kind, s.is_settled()) {
                (PaymentEvent::CheckoutCompleted(_), false) => PaymentSignal::CheckoutPending,
                _ => PaymentSignal::Succeeded,
            };
            let Some(order_id) = s.order_id else {
                return Err(PaymentApplyError::OrderNotFound {
                    reference: s.session_id.clone(),
                });
            };
            (
                signal,
                PaymentDetails::from(s),
                Locator::OrderId(order_id),
                order_id.to_string(),
            )
        }
        PaymentEvent::PaymentSucceeded(p) => (
            PaymentSignal::Succeeded,
            PaymentDetails::from(p),
            Locator::PaymentIntent {
                id: &p.payment_intent_id,
                order_id: p.order_id,
            },
            p.payment_intent_id.clone(),
        ),
        PaymentEvent::PaymentFailed(p) => (
            PaymentSignal::Failed,
            PaymentDetails::from(p),
            Locator::PaymentIntent {
                id: &p.payment_intent_id,
                order_id: p.order_id,
            },
            p.payment_intent_id.clone(),
        ),
        PaymentEvent::Ignored => return Ok(ApplyOutcome::Ignored),
    };

    let mut tx = pool.begin().await.context("payment tx begin failed")?;

    let Some(order) = lock_order(&mut tx, &locator).await? else {
        tx.rollback().await.context("payment tx rollback failed")?;
        return match signal {
            PaymentSignal::Failed => Ok(ApplyOutcome::OrderNotFound { reference }),
            PaymentSignal::Succeeded | PaymentSignal::CheckoutPending => {
                Err(PaymentApplyError::OrderNotFound { reference })
            }
        };
    };

    if !record_payment_event(&mut tx, &event.id, &event.event_type, Some(order.id)).await? {
        tx.rollback().await.context("payment tx rollback failed")?;
        return Ok(ApplyOutcome::Duplicate);
    }

    let transition = plan(&order.state(), signal);
    let mut confirmation_number = order.confirmation_number.clone();

    match transition {
        Transition::MarkPaid { .. } => {
            mark_paid(&mut tx, order.id, &details, now).await?;
        }
        Transition::AlreadyPaid { .. } | Transition::RecordPending => {
            merge_details(&mut tx, order.id, &details).await?;
        }
        Transition::MarkFailed => {
            mark_failed(&mut tx, order.id, &details).await?;
        }
        Transition::Ignore(reason) => {
            tracing::info!(order_id = %order.id, event_id = %event.id, ?reason, "payment event ignored");
        }
    }

    if transition.allocates_confirmation() {
        confirmation_number =
            allocate_confirmation_number(&mut tx, order.id, confirmation_prefix, now).await?;
    }

    tx.commit().await.context("payment tx commit failed")?;

    Ok(ApplyOutcome::Applied(AppliedPayment {
        order_id: order.id,
        transition,
        confirmation_number,
        notify_email: order.email.or(order.customer_email).or(details.customer_email),
        contact_name: order.contact_name,
    }))
}

/// Insert into the event inbox. Returns false when the event id is already
/// recorded.
pub async fn record_payment_event(
    conn: &mut PgConnection,
    event_id: &str,
    event_type: &str,
    order_id: Option<Uuid>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        insert into payment_events (event_id, event_type, order_id)
        values ($1, $2, $3)
        on conflict (event_id) do nothing
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(order_id)
    .execute(conn)
    .await
    .context("record_payment_event failed")?;

    Ok(res.rows_affected() == 1)
}

const LOCK_COLUMNS: &str =
    "id, paid, payment_status, confirmation_number, email, customer_email, contact_name";

async fn lock_order(conn: &mut PgConnection, locator: &Locator<'_>) -> Result<Option<LockedOrder>> {
    match *locator {
        Locator::OrderId(id) => lock_order_by_id(conn, id).await,
        Locator::PaymentIntent { id, order_id } => {
            let row = sqlx::query(&format!(
                "select {LOCK_COLUMNS} from orders where payment_intent_id = $1 \
                 order by created_at limit 1 for update"
            ))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("lock order by payment intent failed")?;

            match (row, order_id) {
                (Some(row), _) => locked_from_row(&row).map(Some),
                (None, Some(order_id)) => lock_order_by_id(conn, order_id).await,
                (None, None) => Ok(None),
            }
        }
    }
}

async fn lock_order_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<LockedOrder>> {
    let row = sqlx::query(&format!("select {LOCK_COLUMNS} from orders where id = $1 for update"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .context("lock order for payment failed")?;

    row.as_ref().map(locked_from_row).transpose()
}

fn locked_from_row(row: &PgRow) -> Result<LockedOrder> {
    let payment_status: String = row.try_get("payment_status")?;
    Ok(LockedOrder {
        id: row.try_get("id")?,
        paid: row.try_get("paid")?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or_else(|| anyhow!("invalid payment status: {}", payment_status))?,
        confirmation_number: row.try_get("confirmation_number")?,
        email: row.try_get("email")?,
        customer_email: row.try_get("customer_email")?,
        contact_name: row.try_get("contact_name")?,
    })
}

async fn mark_paid(
    conn: &mut PgConnection,
    order_id: Uuid,
    details: &PaymentDetails,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        update orders
        set paid                = true,
            payment_status      = 'paid',
            status              = 'paid',
            paid_at             = coalesce(paid_at, $2),
            checkout_session_id = coalesce(checkout_session_id, $3),
            payment_intent_id   = coalesce(payment_intent_id, $4),
            amount_total_cents  = coalesce(amount_total_cents, $5),
            currency            = coalesce(currency, $6),
            customer_email      = coalesce(customer_email, $7),
            updated_at          = now()
        where id = $1
        "#,
    )
    .bind(order_id)
    .bind(now)
    .bind(&details.checkout_session_id)
    .bind(&details.payment_intent_id)
    .bind(details.amount_total_cents)
    .bind(&details.currency)
    .bind(&details.customer_email)
    .execute(conn)
    .await
    .context("mark_paid failed")?;
    Ok(())
}

async fn merge_details(conn: &mut PgConnection, order_id: Uuid, details: &PaymentDetails) -> Result<()> {
    sqlx::query(
        r#"
        update orders
        set checkout_session_id = coalesce(checkout_session_id, $2),
            payment_intent_id   = coalesce(payment_intent_id, $3),
            amount_total_cents  = coalesce(amount_total_cents, $4),
            currency            = coalesce(currency, $5),
            customer_email      = coalesce(customer_email, $6),
            updated_at          = now()
        where id = $1
        "#,
    )
    .bind(order_id)
    .bind(&details.checkout_session_id)
    .bind(&details.payment_intent_id)
    .bind(details.amount_total_cents)
    .bind(&details.currency)
    .bind(&details.customer_email)
    .execute(conn)
    .await
    .context("merge payment details failed")?;
    Ok(())
}

async fn mark_failed(conn: &mut PgConnection, order_id: Uuid, details: &PaymentDetails) -> Result<()> {
    // `paid = false` is re-checked here even though the row is locked.
    sqlx::query(
        r#"
        update orders
        set payment_status    = 'failed',
            status            = 'failed',
            payment_intent_id = coalesce(payment_intent_id, $2),
            updated_at        = now()
        where id = $1 and paid = false
        "#,
    )
    .bind(order_id)
    .bind(&details.payment_intent_id)
    .execute(conn)
    .await
    .context("mark_failed failed")?;
    Ok(())
}

/// Assign a confirmation number, regenerating on UNIQUE conflicts. Each
/// attempt runs in a savepoint so a conflict does not poison the outer
/// transaction.
///
/// Returns `None` when every attempt collided; the order stays paid without
/// a number and a redelivered success retries.
async fn allocate_confirmation_number(
    conn: &mut PgConnection,
    order_id: Uuid,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
        let candidate = new_confirmation_number(prefix, now);
        let mut sp = conn.begin().await.context("confirmation savepoint failed")?;

        let res = sqlx::query(
            r#"
            update orders
            set confirmation_number = $2,
                updated_at = now()
            where id = $1 and confirmation_number is null
            returning confirmation_number
            "#,
        )
        .bind(order_id)
        .bind(&candidate)
        .fetch_optional(&mut *sp)
        .await;

        match res {
            Ok(row) => {
                sp.commit().await.context("confirmation savepoint release failed")?;
                return Ok(match row {
                    Some(r) => Some(r.try_get("confirmation_number")?),
                    None => None,
                });
            }
            Err(e) if is_unique_constraint_violation(&e, CONFIRMATION_CONSTRAINT) => {
                sp.rollback().await.context("confirmation savepoint rollback failed")?;
                tracing::warn!(order_id = %order_id, attempt, "confirmation number collision; regenerating");
            }
            Err(e) => return Err(anyhow::Error::new(e).context("confirmation number update failed")),
        }
    }

    tracing::error!(
        order_id = %order_id,
        attempts = MAX_ALLOCATION_ATTEMPTS,
        "confirmation number allocation gave up; order paid without a number"
    );
    Ok(None)
}
