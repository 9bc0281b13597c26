use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::service::clock::TransitionRejection;
use crate::service::crypto::CryptoError;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

/// Every failure the core can surface to the boundary that invoked it.
#[derive(Debug, Error)]
pub enum AppError {
    /// Entity absent, or outside the caller's location.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} already exists")]
    Duplicate(String),

    /// State machine rule violated; the rejection says exactly which one.
    #[error(transparent)]
    ValidationConflict(#[from] TransitionRejection),

    /// Lost the race on the atomic clock transition after one re-validation.
    #[error("Another clock action for this employee was recorded concurrently, please retry")]
    ConcurrencyConflict,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Mail delivery is not configured")]
    DeliveryUnavailable,

    #[error("Mail delivery failed: {0}")]
    DeliveryFailed(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(what) => AppError::Duplicate(what.to_string()),
            StoreError::Conflict => AppError::ConcurrencyConflict,
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    /// Stable machine-readable code for the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::Duplicate(_) => "duplicate",
            AppError::ValidationConflict(r) => r.code(),
            AppError::ConcurrencyConflict => "concurrency_conflict",
            AppError::Crypto(CryptoError::AuthenticationFailure) => "crypto_authentication_failure",
            AppError::Crypto(_) => "crypto_error",
            AppError::DeliveryUnavailable => "delivery_unavailable",
            AppError::DeliveryFailed(_) => "delivery_failed",
            AppError::Store(_) => "store_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Store(_) | AppError::Internal(_) | AppError::Crypto(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate(_)
            | AppError::ValidationConflict(_)
            | AppError::ConcurrencyConflict => StatusCode::CONFLICT,
            AppError::DeliveryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Crypto(_) | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // details of storage and crypto failures stay in the log
        let message = if self.is_internal() {
            error!(error = %self, code = self.code(), "Request failed");
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": self.code(),
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_concurrency_conflict() {
        let err: AppError = StoreError::Conflict.into();
        assert!(matches!(err, AppError::ConcurrencyConflict));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn crypto_authentication_failure_has_its_own_code() {
        let tampered = AppError::Crypto(CryptoError::AuthenticationFailure);
        let unknown = AppError::Crypto(CryptoError::UnknownKeyVersion("v9".into()));
        assert_eq!(tampered.code(), "crypto_authentication_failure");
        assert_eq!(unknown.code(), "crypto_error");
        assert_eq!(tampered.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn delivery_errors_are_distinct() {
        assert_eq!(
            AppError::DeliveryUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::DeliveryFailed("status 500".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
