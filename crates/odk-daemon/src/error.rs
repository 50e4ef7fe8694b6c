//! HTTP error taxonomy.
//!
//! Every handler returns `Result<_, ApiError>`; the `IntoResponse` impl is
//! the single place status codes and error bodies are decided.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::api_types::ErrorResponse;

/// Field name -> human-readable problem.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid session")]
    Authentication,
    #[error("missing or invalid csrf token")]
    Csrf,
    #[error("validation failed")]
    Validation { fields: FieldErrors },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("token expired")]
    ExpiredToken,
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    Conflict(String),
    #[error("webhook signature verification failed")]
    SignatureVerification,
    #[error("payment provider request failed")]
    Provider(#[source] anyhow::Error),
    #[error("internal persistence error")]
    Persistence(#[source] anyhow::Error),
}

impl ApiError {
    pub fn field(name: &str, problem: &str) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(name.to_string(), problem.to_string());
        ApiError::Validation { fields }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Authentication => StatusCode::UNAUTHORIZED,
            ApiError::Csrf => StatusCode::FORBIDDEN,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ExpiredToken => StatusCode::GONE,
            ApiError::QuotaExceeded(_) | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::SignatureVerification => StatusCode::BAD_REQUEST,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Authentication => "AUTHENTICATION",
            ApiError::Csrf => "CSRF",
            ApiError::Validation { .. } => "VALIDATION",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ExpiredToken => "EXPIRED_TOKEN",
            ApiError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::SignatureVerification => "SIGNATURE_VERIFICATION",
            ApiError::Provider(_) => "PROVIDER",
            ApiError::Persistence(_) => "PERSISTENCE",
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Persistence(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal detail goes to the log, never to the client.
        match &self {
            ApiError::Provider(e) => tracing::error!(error = ?e, "payment provider error"),
            ApiError::Persistence(e) => tracing::error!(error = ?e, "persistence error"),
            _ => {}
        }

        let fields = match &self {
            ApiError::Validation { fields } => Some(fields.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
            fields,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        let cases = [
            (ApiError::Authentication, 401),
            (ApiError::Csrf, 403),
            (ApiError::field("postalCode", "must be 5 digits"), 400),
            (ApiError::NotFound("order"), 404),
            (ApiError::ExpiredToken, 410),
            (ApiError::QuotaExceeded("full".into()), 409),
            (ApiError::SignatureVerification, 400),
            (ApiError::Provider(anyhow::anyhow!("down")), 502),
            (ApiError::Persistence(anyhow::anyhow!("db")), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{err:?}");
        }
    }

    #[test]
    fn persistence_message_hides_detail() {
        let err = ApiError::Persistence(anyhow::anyhow!("password authentication failed for user"));
        assert_eq!(err.to_string(), "internal persistence error");
    }
}
