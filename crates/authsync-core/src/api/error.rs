use std::sync::Arc;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Error code the authentication service attaches to a 401 caused by expiry.
pub const TOKEN_EXPIRED_CODE: &str = "token.expired";

/// Errors produced by the API client.
///
/// Cloneable: a single renewal failure is handed to every request that was
/// waiting on that renewal.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Unauthorized (code: {})", .code.as_deref().unwrap_or("none"))]
    Unauthorized { code: Option<String> },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(Arc<reqwest::Error>),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Token renewal failed: {0}")]
    RenewalFailed(Box<ApiError>),

    /// Raised in non-interactive contexts in place of a sign-out redirect.
    #[error("Invalid authentication token: {0}")]
    InvalidAuthToken(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::NetworkError(Arc::new(err))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized {
                code: serde_json::from_str::<ErrorBody>(body)
                    .ok()
                    .and_then(|b| b.code),
            },
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// A 401 whose body code is exactly `token.expired`.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, ApiError::Unauthorized { code: Some(code) } if code == TOKEN_EXPIRED_CODE)
    }

    pub fn is_invalid_auth_token(&self) -> bool {
        matches!(self, ApiError::InvalidAuthToken(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_401_with_expired_code() {
        let err = ApiError::from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"error":true,"code":"token.expired","message":"Token expired."}"#,
        );
        assert!(err.is_unauthorized());
        assert!(err.is_token_expired());
    }

    #[test]
    fn test_401_with_other_code_is_not_expiry() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"code":"token.invalid"}"#);
        assert!(err.is_unauthorized());
        assert!(!err.is_token_expired());

        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, "not json");
        assert!(matches!(err, ApiError::Unauthorized { code: None }));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ApiError::from_status(StatusCode::FORBIDDEN, "no"), ApiError::AccessDenied(_)));
        assert!(matches!(ApiError::from_status(StatusCode::NOT_FOUND, ""), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited));
        assert!(matches!(ApiError::from_status(StatusCode::BAD_GATEWAY, ""), ApiError::ServerError(_)));
        assert!(matches!(ApiError::from_status(StatusCode::BAD_REQUEST, ""), ApiError::InvalidResponse(_)));
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(2000);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError(msg) => {
                assert!(msg.contains("truncated, 2000 total bytes"));
                assert!(msg.len() < 600);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
