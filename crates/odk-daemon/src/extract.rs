//! Body and query extractors whose rejections go through [`ApiError`].
//!
//! Axum's own `Json`/`Query` reject with a plain-text 4xx; these wrappers
//! turn every rejection into a `VALIDATION` error with field detail.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ApiError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "json body rejected");
        rejection_to_validation(&rejection.body_text(), "body")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "query string rejected");
        rejection_to_validation(&rejection.body_text(), "query")
    }
}

/// A missing field is reported under its own name; anything else under
/// `fallback` with the deserializer's message.
fn rejection_to_validation(text: &str, fallback: &str) -> ApiError {
    if let Some(name) = missing_field(text) {
        return ApiError::field(name, "is required");
    }
    ApiError::field(fallback, text)
}

fn missing_field(text: &str) -> Option<&str> {
    let (_, rest) = text.split_once("missing field `")?;
    let (name, _) = rest.split_once('`')?;
    (!name.is_empty()).then_some(name)
}
