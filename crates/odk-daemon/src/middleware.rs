//! Request guards: the order session extractor and the CSRF middleware.

use std::sync::Arc;

use axum::{
    async_trait,
    body::{to_bytes, Body},
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::api_types::CSRF_HEADER;
use crate::error::ApiError;
use crate::state::AppState;

/// Mutating endpoints that do not require a CSRF token: the two bootstrap
/// endpoints that hand one out, and the provider-driven webhook.
pub const CSRF_EXEMPT_PATHS: &[&str] = &["/orders", "/upload-session", "/webhook"];

/// Largest JSON body the CSRF guard will buffer to look for `csrfToken`.
const MAX_GUARDED_BODY_BYTES: usize = 64 * 1024;

/// The order a verified Session Token grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSession(pub Uuid);

impl OrderSession {
    pub fn order_id(&self) -> Uuid {
        self.0
    }

    /// A token for one order never authorises another.
    pub fn require(&self, order_id: Uuid) -> Result<(), ApiError> {
        if self.0 == order_id {
            Ok(())
        } else {
            tracing::warn!(session_order = %self.0, requested_order = %order_id, "session/order mismatch");
            Err(ApiError::Authentication)
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for OrderSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, st: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Authentication)?;
        st.sessions
            .verify(token)
            .map(OrderSession)
            .ok_or(ApiError::Authentication)
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn csrf_from_body(bytes: &[u8]) -> Option<String> {
    let v: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    v.get("csrfToken")?.as_str().map(str::to_string)
}

/// CSRF middleware.
///
/// For mutating, non-exempt requests: the token comes from `x-csrf-token`,
/// else from the JSON body field `csrfToken`; its bound subject must be the
/// order id of the bearer Session Token. Anything else is a 403 and the
/// handler never runs.
pub async fn csrf_guard(State(st): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if !is_mutating(req.method()) || CSRF_EXEMPT_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let Some(subject) = bearer_token(req.headers()).and_then(|t| st.sessions.verify(t)) else {
        return ApiError::Csrf.into_response();
    };

    let header_token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (token, req) = match header_token {
        Some(t) => (Some(t), req),
        None => {
            let (parts, body) = req.into_parts();
            let Ok(bytes) = to_bytes(body, MAX_GUARDED_BODY_BYTES).await else {
                return ApiError::Csrf.into_response();
            };
            let token = csrf_from_body(&bytes);
            (token, Request::from_parts(parts, Body::from(bytes)))
        }
    };

    let valid = token
        .as_deref()
        .is_some_and(|t| st.csrf.validate(t, &subject.to_string()));
    if !valid {
        tracing::warn!(order_id = %subject, path = %req.uri().path(), "csrf check failed");
        return ApiError::Csrf.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted_and_trimmed() {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def "));
        assert_eq!(bearer_token(&h), Some("abc.def"));

        h.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(bearer_token(&h), None);

        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&h), None);
    }

    #[test]
    fn csrf_token_can_come_from_json_body() {
        assert_eq!(
            csrf_from_body(br#"{"orderId":"x","csrfToken":"abc"}"#).as_deref(),
            Some("abc")
        );
        assert_eq!(csrf_from_body(br#"{"csrfToken":7}"#), None);
        assert_eq!(csrf_from_body(b"not json"), None);
    }

    #[test]
    fn only_state_changing_methods_are_guarded() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::OPTIONS));
    }
}
