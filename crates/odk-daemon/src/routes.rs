//! Axum router and all HTTP handlers for odk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! the tracing and CORS layers. The CSRF guard is part of the router itself
//! so tests exercise it too.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use odk_auth::upload_token::{evaluate, expiry_from, generate_upload_token, ExchangeError, ExchangeKind};
use odk_db::{ApplyOutcome, DenyReason, PaymentApplyError, QuotaError};
use odk_reconcile::{parse_event, verify_signature, SIGNATURE_HEADER};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        CheckoutRequest, CheckoutResponse, CreateUploadRequest, CreateUploadResponse, CsrfResponse,
        HealthResponse, OrderSessionResponse, QuotaQuery, QuotaResponse, SessionDetailsResponse,
        SessionQuery, SubmitRequest, SubmitResponse, UploadSessionRequest, WebhookAck, CSRF_HEADER,
    },
    error::ApiError,
    extract::{ApiJson, ApiQuery},
    middleware::{csrf_guard, OrderSession},
    notify::{PaymentNotice, SubmissionNotice},
    provider::{is_valid_session_id, NewCheckout},
    state::AppState,
    validation::{validate_submission, validate_upload},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/orders", post(create_order))
        .route("/csrf", get(refresh_csrf))
        .route("/submit", post(submit))
        .route("/upload-session", post(upload_session))
        .route("/uploads", post(create_upload))
        .route("/uploads/quota", get(upload_quota))
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/session", get(session_details))
        .route("/webhook", post(webhook))
        .layer(from_fn_with_state(Arc::clone(&state), csrf_guard))
        .with_state(state)
}

/// Session token in the body, bound CSRF token in the `x-csrf-token` header.
fn order_session_response(st: &AppState, order_id: Uuid, status: StatusCode) -> Response {
    let session_token = st.sessions.issue(order_id);
    let csrf_token = st.csrf.issue(&order_id.to_string());

    let mut resp = (
        status,
        Json(OrderSessionResponse {
            order_id,
            session_token,
        }),
    )
        .into_response();
    if let Ok(v) = HeaderValue::from_str(&csrf_token) {
        resp.headers_mut().insert(CSRF_HEADER, v);
    }
    resp
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /orders  (bootstrap, CSRF-exempt)
// ---------------------------------------------------------------------------

pub(crate) async fn create_order(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let order_id = odk_db::insert_order(&st.pool).await?;
    info!(order_id = %order_id, "order created");
    Ok(order_session_response(&st, order_id, StatusCode::CREATED))
}

// ---------------------------------------------------------------------------
// GET /csrf
// ---------------------------------------------------------------------------

/// Fresh CSRF token for the session's order; CSRF tokens outlive neither
/// their hour nor a process restart.
pub(crate) async fn refresh_csrf(State(st): State<Arc<AppState>>, session: OrderSession) -> Response {
    let csrf_token = st.csrf.issue(&session.order_id().to_string());
    let mut resp = Json(CsrfResponse {
        csrf_token: csrf_token.clone(),
    })
    .into_response();
    if let Ok(v) = HeaderValue::from_str(&csrf_token) {
        resp.headers_mut().insert(CSRF_HEADER, v);
    }
    resp
}

// ---------------------------------------------------------------------------
// POST /submit
// ---------------------------------------------------------------------------

pub(crate) async fn submit(
    State(st): State<Arc<AppState>>,
    session: OrderSession,
    ApiJson(req): ApiJson<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    session.require(req.order_id)?;
    let form = validate_submission(&req)?;

    let now = Utc::now();
    let upload_token = generate_upload_token();

    let mut tx = st.pool.begin().await.map_err(|e| ApiError::Persistence(e.into()))?;
    if !odk_db::submit_order_fields(&mut tx, req.order_id, &form).await? {
        return Err(ApiError::NotFound("order"));
    }
    odk_db::create_upload_token(
        &mut tx,
        req.order_id,
        &upload_token,
        expiry_from(now, st.settings.upload_token_ttl_secs),
    )
    .await?;
    tx.commit().await.map_err(|e| ApiError::Persistence(e.into()))?;

    info!(order_id = %req.order_id, "order submitted");

    let notice = SubmissionNotice {
        order_id: req.order_id,
        contact_name: form.contact_name,
        email: form.email,
        upload_link: st.upload_link(&upload_token),
    };
    if let Err(e) = st.notifier.order_submitted(&notice).await {
        tracing::error!(order_id = %req.order_id, error = ?e, "submission notification failed");
    }

    Ok(Json(SubmitResponse {
        ok: true,
        order_id: req.order_id,
    }))
}

// ---------------------------------------------------------------------------
// POST /upload-session  (bootstrap, CSRF-exempt)
// ---------------------------------------------------------------------------

/// Exchange an upload token for a Session Token and a bound CSRF token.
///
/// The token stays usable after first use until it expires, so reloading
/// the upload page keeps working.
pub(crate) async fn upload_session(
    State(st): State<Arc<AppState>>,
    ApiJson(req): ApiJson<UploadSessionRequest>,
) -> Result<Response, ApiError> {
    let token = req.token.trim();
    if token.is_empty() {
        return Err(ApiError::field("token", "is required"));
    }

    let now = Utc::now();
    let row = odk_db::fetch_upload_token(&st.pool, token).await?;
    let state = row.as_ref().map(|r| r.state());

    match evaluate(state.as_ref(), now) {
        Err(ExchangeError::NotFound) => Err(ApiError::NotFound("upload token")),
        Err(ExchangeError::Expired) => Err(ApiError::ExpiredToken),
        Ok(kind) => {
            let Some(row) = row else {
                return Err(ApiError::NotFound("upload token"));
            };
            if kind == ExchangeKind::FirstUse {
                odk_db::mark_upload_token_used(&st.pool, row.id, now).await?;
            }
            info!(order_id = %row.order_id, ?kind, "upload token exchanged");
            Ok(order_session_response(&st, row.order_id, StatusCode::OK))
        }
    }
}

// ---------------------------------------------------------------------------
// POST /uploads
// ---------------------------------------------------------------------------

/// Record one uploaded file. Reservation and insert share one transaction,
/// so concurrent uploads for the same order cannot overshoot the quota.
pub(crate) async fn create_upload(
    State(st): State<Arc<AppState>>,
    session: OrderSession,
    ApiJson(req): ApiJson<CreateUploadRequest>,
) -> Result<Response, ApiError> {
    session.require(req.order_id)?;
    let upload = validate_upload(&req)?;
    let max = st.settings.max_uploads_per_order;

    let mut tx = st.pool.begin().await.map_err(|e| ApiError::Persistence(e.into()))?;

    let decision = match odk_db::reserve_upload_slot(&mut tx, req.order_id, max).await {
        Ok(d) => d,
        Err(QuotaError::OrderNotFound(_)) => return Err(ApiError::NotFound("order")),
    };

    if !decision.allowed {
        // Dropping `tx` rolls back and releases the row lock.
        drop(tx);
        let message = decision.message.unwrap_or_default();
        return Err(match decision.deny_reason {
            Some(DenyReason::Unavailable) => ApiError::Persistence(anyhow::anyhow!(message)),
            _ => {
                info!(order_id = %req.order_id, count = decision.current_count, max, "upload quota exhausted");
                ApiError::QuotaExceeded(message)
            }
        });
    }

    let upload_id = odk_db::insert_upload(&mut tx, &upload).await?;
    tx.commit().await.map_err(|e| ApiError::Persistence(e.into()))?;

    info!(order_id = %req.order_id, upload_id = %upload_id, area = %upload.area, "upload recorded");
    Ok((
        StatusCode::CREATED,
        Json(CreateUploadResponse {
            upload_id,
            current_count: decision.current_count + 1,
            max_uploads: max,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /uploads/quota
// ---------------------------------------------------------------------------

pub(crate) async fn upload_quota(
    State(st): State<Arc<AppState>>,
    session: OrderSession,
    ApiQuery(q): ApiQuery<QuotaQuery>,
) -> Result<Json<QuotaResponse>, ApiError> {
    session.require(q.order_id)?;
    let d = odk_db::advisory_upload_quota(&st.pool, q.order_id, st.settings.max_uploads_per_order).await?;
    Ok(Json(QuotaResponse {
        allowed: d.allowed,
        current_count: d.current_count,
        max_uploads: d.max_uploads,
        remaining: d.remaining(),
        message: d.message,
    }))
}

// ---------------------------------------------------------------------------
// POST /create-checkout-session
// ---------------------------------------------------------------------------

pub(crate) async fn create_checkout_session(
    State(st): State<Arc<AppState>>,
    session: OrderSession,
    ApiJson(req): ApiJson<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    session.require(req.order_id)?;

    let order = odk_db::fetch_order(&st.pool, req.order_id)
        .await?
        .ok_or(ApiError::NotFound("order"))?;
    if order.paid {
        return Err(ApiError::Conflict("order is already paid".to_string()));
    }

    let checkout = NewCheckout {
        order_id: order.id,
        amount_cents: st.settings.amount_cents,
        currency: st.settings.currency.clone(),
        product_name: st.settings.product_name.clone(),
        customer_email: order.email.clone(),
        success_url: st.checkout_success_url(),
        cancel_url: st.checkout_cancel_url(order.id),
    };

    let created = st
        .provider
        .create_checkout_session(&checkout)
        .await
        .map_err(ApiError::Provider)?;

    odk_db::set_checkout_session(&st.pool, order.id, &created.session_id).await?;
    info!(order_id = %order.id, provider = st.provider.name(), session_id = %created.session_id, "checkout session created");

    Ok(Json(CheckoutResponse {
        session_id: created.session_id,
        url: created.url,
    }))
}

// ---------------------------------------------------------------------------
// GET /session
// ---------------------------------------------------------------------------

pub(crate) async fn session_details(
    State(st): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<SessionQuery>,
) -> Result<Json<SessionDetailsResponse>, ApiError> {
    if !is_valid_session_id(&q.session_id) {
        return Err(ApiError::field("session_id", "is not a valid checkout session id"));
    }

    let s = st
        .provider
        .retrieve_session(&q.session_id)
        .await
        .map_err(ApiError::Provider)?;

    Ok(Json(SessionDetailsResponse {
        session_id: s.session_id,
        status: s.status,
        payment_status: s.payment_status,
        customer_email: s.customer_email,
        amount_total: s.amount_total,
        currency: s.currency,
        order_id: s.order_id,
    }))
}

// ---------------------------------------------------------------------------
// POST /webhook  (provider-driven, CSRF-exempt)
// ---------------------------------------------------------------------------

/// Verify, parse, apply under lock, then notify.
///
/// The signature is checked over the raw body before anything else; a bad
/// signature never reaches the database. Persistence failure is a 500 and a
/// success event for an unknown order is a 404, so the provider redelivers.
pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let now = Utc::now();

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::SignatureVerification)?;

    if let Err(e) = verify_signature(
        &body,
        signature,
        &st.webhook_secret,
        now.timestamp(),
        st.settings.webhook_tolerance_secs,
    ) {
        warn!(error = %e, "webhook signature rejected");
        return Err(ApiError::SignatureVerification);
    }

    let event = parse_event(&body).map_err(|e| {
        warn!(error = %e, "webhook payload rejected");
        ApiError::field("body", "unrecognised event payload")
    })?;

    let outcome = match odk_db::apply_payment_event(&st.pool, &event, &st.settings.confirmation_prefix, now).await {
        Ok(outcome) => outcome,
        Err(PaymentApplyError::OrderNotFound { reference }) => {
            // Non-2xx so the provider redelivers once the order exists.
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                reference = %reference,
                "payment success references no known order"
            );
            return Err(ApiError::NotFound("order"));
        }
        Err(PaymentApplyError::Persistence(e)) => return Err(ApiError::Persistence(e)),
    };

    match outcome {
        ApplyOutcome::Ignored => {
            info!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
        }
        ApplyOutcome::Duplicate => {
            info!(event_id = %event.id, event_type = %event.event_type, "webhook event already processed");
        }
        ApplyOutcome::OrderNotFound { reference } => {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                reference = %reference,
                "payment failure references no known order"
            );
        }
        ApplyOutcome::Applied(applied) => {
            info!(
                event_id = %event.id,
                order_id = %applied.order_id,
                transition = ?applied.transition,
                "payment event applied"
            );
            if applied.notifies_customer() {
                let notice = PaymentNotice {
                    order_id: applied.order_id,
                    email: applied.notify_email,
                    contact_name: applied.contact_name,
                    confirmation_number: applied.confirmation_number,
                };
                if let Err(e) = st.notifier.payment_confirmed(&notice).await {
                    tracing::error!(order_id = %notice.order_id, error = ?e, "payment notification failed");
                }
            }
        }
    }

    Ok(Json(WebhookAck { received: true }))
}
