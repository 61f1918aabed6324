//! Auth errors and their JSON envelope.

use crate::auth::models::ErrorResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Every way an authentication or authorization step can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("authorization header required")]
    Unauthenticated,

    #[error("authorization header format must be Bearer {{token}}")]
    MalformedHeader,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    /// Not produced by `auth_middleware`, which reports expiry as
    /// `TokenInvalid` with the reason attached.
    #[error("token expired")]
    TokenExpired,

    #[error("refresh token expired")]
    RefreshExpired,

    #[error("user invalid: {0}")]
    UserInvalid(String),

    #[error("user is inactive")]
    UserInactive,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated
            | Self::MalformedHeader
            | Self::InvalidCredentials
            | Self::TokenInvalid(_)
            | Self::TokenExpired
            | Self::RefreshExpired
            | Self::UserInvalid(_)
            | Self::UserInactive => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable summary placed in the envelope's `message`.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "invalid request parameters",
            Self::Unauthenticated => "authentication token required",
            Self::MalformedHeader => "malformed authentication token",
            Self::InvalidCredentials => "invalid username or password",
            Self::TokenInvalid(_) => "invalid token",
            Self::TokenExpired => "token expired",
            Self::RefreshExpired => "refresh token expired",
            Self::UserInvalid(_) => "user invalid",
            Self::UserInactive => "user is disabled",
            Self::Forbidden(_) => "insufficient permissions",
            Self::Internal(_) => "internal server error",
        }
    }

    /// Detail placed in the envelope's `error`.
    pub fn detail(&self) -> String {
        match self {
            Self::MalformedRequest(reason)
            | Self::TokenInvalid(reason)
            | Self::UserInvalid(reason)
            | Self::Forbidden(reason)
            | Self::Internal(reason) => reason.clone(),
            Self::Unauthenticated => "Authorization header required".to_string(),
            Self::MalformedHeader => {
                "Authorization header format must be Bearer {token}".to_string()
            }
            Self::InvalidCredentials => "invalid username or password".to_string(),
            Self::TokenExpired => "token has expired".to_string(),
            Self::RefreshExpired => "Refresh token expired".to_string(),
            Self::UserInactive => "User is inactive".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: status.as_u16(),
            message: self.message().to_string(),
            error: Some(self.detail()),
        };
        (status, Json(body)).into_response()
    }
}
