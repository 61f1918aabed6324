//! Authentication Middleware
//! Validates bearer tokens and attaches the caller's [`AuthContext`].

use crate::auth::{error::AuthError, jwt::TokenService, models::AuthContext};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Auth middleware that validates JWT access tokens
pub async fn auth_middleware(
    State(tokens): State<Arc<TokenService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let ctx = authenticate(&tokens, req.headers())?;

    debug!(user_id = %ctx.user_id, role = %ctx.role, "Request authenticated");
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

/// Resolve the caller from the request headers.
pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::Unauthenticated)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let token = bearer_token(header).ok_or(AuthError::MalformedHeader)?;

    let claims = tokens
        .validate_token(token)
        .map_err(|e| AuthError::TokenInvalid(e.to_string()))?;

    AuthContext::from_claims(&claims)
        .ok_or_else(|| AuthError::TokenInvalid("invalid user id in token".to_string()))
}

/// `Bearer <token>`: one space, two parts, no further whitespace.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if scheme != "Bearer" || token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

/// Handlers behind `auth_middleware` take the context as an argument.
#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

/// Optional variant of the [`AuthContext`] extractor; never rejects.
#[derive(Debug, Clone)]
pub struct MaybeAuth(pub Option<AuthContext>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthContext>().cloned()))
    }
}
