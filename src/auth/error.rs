use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Failures at the persistence layer. Kept distinguishable for logging;
/// everything except `NotFound`/`Conflict` is an infrastructure fault.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no matching row")]
    NotFound,
    #[error("unique constraint violated")]
    Conflict,
    #[error("store deadline exceeded")]
    Timeout,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("internal fault: {0}")]
    Internal(anyhow::Error),
}

/// Auth-flow failures as seen by the HTTP handlers. Security-sensitive
/// causes (unknown user vs. wrong password, expired vs. revoked token)
/// are already collapsed by the time a value of this type exists; the
/// precise cause lives in the log line that produced it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid username or password")]
    AuthenticationFailed,
    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("could not issue session tokens")]
    Issuance(anyhow::Error),
    #[error("store failure")]
    Store(#[from] StoreError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AuthError::AuthenticationFailed => (
                StatusCode::UNAUTHORIZED,
                "Invalid username or password".to_string(),
            ),
            AuthError::InvalidRefreshToken => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired refresh token".to_string(),
            ),
            AuthError::Issuance(e) => {
                error!(error = %e, "token issuance failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Could not generate token".to_string(),
                )
            }
            AuthError::Store(e) => {
                error!(error = %e, "store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server error".to_string(),
                )
            }
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let resp = AuthError::Validation("Invalid email".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn credential_and_token_failures_map_to_401() {
        let resp = AuthError::AuthenticationFailed.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = AuthError::InvalidRefreshToken.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn store_failures_map_to_500() {
        // Duplicate registration surfaces as a store failure, not a 4xx
        let resp = AuthError::Store(StoreError::Conflict).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let resp = AuthError::Store(StoreError::Timeout).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let resp = AuthError::Issuance(anyhow::anyhow!("boom")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
