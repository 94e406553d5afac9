//! Response envelope and error mapping
//!
//! Every API response is `{"ok": true, "result": ...}` or
//! `{"ok": false, "error": {"message": ...}}`.

use crate::pagination::PageError;
use crate::ton::TonError;
use crate::users::UserError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub const RATE_LIMIT: &str = "rate_limit";
pub const ADDRESS_NOT_FOUND: &str = "address_not_found";
pub const USER_EXISTS: &str = "user already exists";
pub const USER_NOT_FOUND: &str = "user not found";
pub const INVALID_REQUEST: &str = "invalid_request";
pub const GENERIC_ERROR: &str = "error";

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn result(result: T) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody {
                message: message.into(),
            }),
        }
    }
}

/// Handler failure rendered as an error envelope
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    pub fn invalid_request(reason: impl std::fmt::Display) -> Self {
        tracing::debug!(reason = %reason, "Rejecting request");
        Self::new(StatusCode::BAD_REQUEST, INVALID_REQUEST)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::error(self.message))).into_response()
    }
}

impl From<PageError> for ApiError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::RateLimited => Self::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT),
            PageError::InvalidRequest(reason) => Self::invalid_request(reason),
            PageError::UpstreamFailure(ref e) => {
                tracing::warn!(error = %e, "Transaction page failed upstream");
                Self::new(StatusCode::BAD_GATEWAY, GENERIC_ERROR)
            }
            PageError::Storage(ref e) => {
                tracing::error!(error = %e, "Transaction cache storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR)
            }
        }
    }
}

impl From<TonError> for ApiError {
    fn from(err: TonError) -> Self {
        match err {
            TonError::Page(e) => e.into(),
            TonError::Upstream(tonapi::Error::RateLimited) => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT)
            }
            TonError::Upstream(tonapi::Error::AddressNotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, ADDRESS_NOT_FOUND)
            }
            TonError::Upstream(e) => {
                tracing::warn!(error = %e, "TonAPI request failed");
                Self::new(StatusCode::BAD_GATEWAY, GENERIC_ERROR)
            }
            e @ TonError::UnsupportedAccount(_) => {
                tracing::debug!(error = %e, "Unsupported account type");
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, GENERIC_ERROR)
            }
            e @ TonError::NftOutOfRange { .. } => {
                tracing::debug!(error = %e, "NFT index out of range");
                Self::new(StatusCode::NOT_FOUND, GENERIC_ERROR)
            }
        }
    }
}

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::AlreadyExists(_) => Self::new(StatusCode::CONFLICT, USER_EXISTS),
            UserError::NotFound => Self::new(StatusCode::NOT_FOUND, USER_NOT_FOUND),
            e => {
                tracing::error!(error = %e, "User store failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(ApiResponse::result(1.5)).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "result": 1.5}));

        let err = serde_json::to_value(ApiResponse::error(RATE_LIMIT)).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"ok": false, "error": {"message": "rate_limit"}})
        );
    }

    #[test]
    fn test_error_mapping() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (PageError::RateLimited.into(), StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT),
            (
                PageError::UpstreamFailure("x".into()).into(),
                StatusCode::BAD_GATEWAY,
                GENERIC_ERROR,
            ),
            (
                PageError::Storage("x".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
                GENERIC_ERROR,
            ),
            (
                TonError::Upstream(tonapi::Error::AddressNotFound("x".into())).into(),
                StatusCode::NOT_FOUND,
                ADDRESS_NOT_FOUND,
            ),
            (
                TonError::Upstream(tonapi::Error::RateLimited).into(),
                StatusCode::TOO_MANY_REQUESTS,
                RATE_LIMIT,
            ),
            (
                TonError::Page(PageError::InvalidRequest("x".into())).into(),
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
            ),
            (UserError::AlreadyExists(1).into(), StatusCode::CONFLICT, USER_EXISTS),
            (UserError::NotFound.into(), StatusCode::NOT_FOUND, USER_NOT_FOUND),
        ];

        for (err, status, message) in cases {
            assert_eq!(err.status, status);
            assert_eq!(err.message, message);
        }
    }
}
