//! Authentication API Endpoints
//! Login, refresh and logout flows on top of the store and token service.

use crate::auth::{
    error::AuthError,
    jwt::{TokenPair, TokenService},
    middleware::MaybeAuth,
    models::{ApiResponse, LoginRequest, RefreshRequest, TokenData},
    user_store::UserStore,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared state for every route.
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub tokens: Arc<TokenService>,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, tokens: Arc<TokenService>) -> Self {
        Self { user_store, tokens }
    }
}

impl From<TokenPair> for TokenData {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
            token_type: "Bearer".to_string(),
        }
    }
}

/// Unwrap a JSON body, turning extractor rejections into the error envelope.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AuthError::MalformedRequest(rejection.body_text()))
}

/// Login endpoint - POST /api/v1/auth/login
pub async fn login(
    State(state): State<AuthState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TokenData>>, AuthError> {
    let payload = json_body(payload)?;
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(AuthError::MalformedRequest(
            "username and password are required".to_string(),
        ));
    }

    info!(username = %payload.username, "Login attempt");

    // unknown user and wrong password must be indistinguishable
    let user = state
        .user_store
        .authenticate(&payload.username, &payload.password)
        .map_err(|e| {
            error!(error = %e, "Credential lookup failed");
            AuthError::Internal("Failed to look up user".to_string())
        })?
        .ok_or_else(|| {
            warn!(username = %payload.username, "Failed login attempt");
            AuthError::InvalidCredentials
        })?;

    if let Err(e) = state.user_store.record_login(&user.id, Utc::now()) {
        warn!(user_id = %user.id, error = %e, "Failed to record last login");
    }

    let pair = state
        .tokens
        .issue_token_pair(&user.id, &user.username, user.role)
        .map_err(|e| {
            error!(error = %e, "Failed to generate tokens");
            AuthError::Internal("Failed to generate tokens".to_string())
        })?;

    info!(username = %user.username, role = %user.role, "Login successful");

    Ok(Json(ApiResponse::ok("login successful", pair.into())))
}

/// Refresh endpoint - POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<AuthState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TokenData>>, AuthError> {
    let payload = json_body(payload)?;
    if payload.refresh_token.is_empty() {
        return Err(AuthError::MalformedRequest(
            "refresh_token is required".to_string(),
        ));
    }

    let claims = state
        .tokens
        .parse_token_unchecked(&payload.refresh_token)
        .map_err(|e| {
            warn!(error = %e, "Invalid refresh token");
            AuthError::TokenInvalid(e.to_string())
        })?;

    if Utc::now().timestamp() > claims.exp {
        warn!(subject = %claims.sub, "Refresh token expired");
        return Err(AuthError::RefreshExpired);
    }

    let user_id = Uuid::parse_str(&claims.sub).map_err(|e| {
        warn!(subject = %claims.sub, error = %e, "Malformed subject in refresh token");
        AuthError::TokenInvalid("invalid user id in token".to_string())
    })?;

    let user = state
        .user_store
        .get_user_by_id(&user_id)
        .map_err(|e| {
            error!(error = %e, "Credential lookup failed");
            AuthError::Internal("Failed to look up user".to_string())
        })?
        .ok_or_else(|| {
            warn!(user_id = %user_id, "Refresh for unknown user");
            AuthError::UserInvalid("user does not exist".to_string())
        })?;

    if !user.is_active {
        warn!(username = %user.username, "Refresh for disabled user");
        return Err(AuthError::UserInactive);
    }

    // role comes from the store, never from the old token
    let pair = state
        .tokens
        .issue_token_pair(&user.id, &user.username, user.role)
        .map_err(|e| {
            error!(error = %e, "Failed to generate new tokens");
            AuthError::Internal("Failed to generate new tokens".to_string())
        })?;

    info!(username = %user.username, "Token refreshed");

    Ok(Json(ApiResponse::ok("token refreshed", pair.into())))
}

/// Logout endpoint - POST /api/v1/auth/logout
///
/// Tokens are stateless, so nothing is invalidated server-side.
pub async fn logout(MaybeAuth(ctx): MaybeAuth) -> Json<ApiResponse<()>> {
    match ctx {
        Some(ctx) => info!(username = %ctx.username, "User logged out"),
        None => warn!("Logout without caller identity"),
    }

    Json(ApiResponse::message("logout successful"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        jwt::DEFAULT_ISSUER,
        models::{AuthContext, UserRole},
        password::PasswordHasher,
        user_store::UserUpdate,
    };
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn create_state() -> (AuthState, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store =
            UserStore::new(temp_file.path().to_str().unwrap(), PasswordHasher::new(4)).unwrap();
        let tokens = TokenService::new(b"api-test-secret", DEFAULT_ISSUER);
        (AuthState::new(Arc::new(store), Arc::new(tokens)), temp_file)
    }

    fn login_body(username: &str, password: &str) -> Result<Json<LoginRequest>, JsonRejection> {
        Ok(Json(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        }))
    }

    fn refresh_body(token: &str) -> Result<Json<RefreshRequest>, JsonRejection> {
        Ok(Json(RefreshRequest {
            refresh_token: token.to_string(),
        }))
    }

    #[tokio::test]
    async fn test_login_issues_tokens_for_current_role() {
        let (state, _temp) = create_state();

        let Json(resp) = login(State(state.clone()), login_body("admin", "admin123"))
            .await
            .unwrap();
        assert_eq!(resp.code, 200);
        let data = resp.data.unwrap();
        assert_eq!(data.token_type, "Bearer");
        assert_eq!(data.expires_in, 3600);

        let admin = state
            .user_store
            .find_active_by_username("admin")
            .unwrap()
            .unwrap();
        let claims = state.tokens.validate_token(&data.access_token).unwrap();
        assert_eq!(claims.sub, admin.id.to_string());
        assert_eq!(claims.role, UserRole::Admin);
        assert!(admin.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (state, _temp) = create_state();

        let wrong_password = login(State(state.clone()), login_body("admin", "wrong"))
            .await
            .unwrap_err();
        let unknown_user = login(State(state.clone()), login_body("ghost", "admin123"))
            .await
            .unwrap_err();

        assert_eq!(wrong_password, AuthError::InvalidCredentials);
        assert_eq!(wrong_password, unknown_user);
    }

    #[tokio::test]
    async fn test_login_rejects_empty_fields() {
        let (state, _temp) = create_state();
        let err = login(State(state), login_body("", "x")).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_refresh_rederives_role() {
        let (state, _temp) = create_state();
        let admin = state
            .user_store
            .find_active_by_username("admin")
            .unwrap()
            .unwrap();
        let user = state
            .user_store
            .create_user("bob", "bob@example.com", "password", UserRole::Manager, None)
            .unwrap();
        let pair = state
            .tokens
            .issue_token_pair(&user.id, &user.username, user.role)
            .unwrap();

        let demote = UserUpdate {
            role: Some(UserRole::Viewer),
            ..Default::default()
        };
        state
            .user_store
            .update_user(&user.id, &demote, &admin.id)
            .unwrap();

        let Json(resp) = refresh(State(state.clone()), refresh_body(&pair.refresh_token))
            .await
            .unwrap();
        let claims = state
            .tokens
            .validate_token(&resp.data.unwrap().access_token)
            .unwrap();
        assert_eq!(claims.role, UserRole::Viewer);
    }

    #[tokio::test]
    async fn test_refresh_expired() {
        let (state, _temp) = create_state();
        let pair = state
            .tokens
            .issue_token_pair_at(
                Utc::now() - Duration::days(8),
                &Uuid::new_v4(),
                "old",
                UserRole::Viewer,
            )
            .unwrap();

        let err = refresh(State(state), refresh_body(&pair.refresh_token))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::RefreshExpired);
    }

    #[tokio::test]
    async fn test_refresh_rejects_foreign_signature() {
        let (state, _temp) = create_state();
        let foreign = TokenService::new(b"not-our-secret", DEFAULT_ISSUER);
        let pair = foreign
            .issue_token_pair(&Uuid::new_v4(), "mallory", UserRole::Admin)
            .unwrap();

        let err = refresh(State(state), refresh_body(&pair.refresh_token))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid(_)));
    }

    #[tokio::test]
    async fn test_refresh_unknown_and_inactive_users() {
        let (state, _temp) = create_state();

        let ghost = state
            .tokens
            .issue_token_pair(&Uuid::new_v4(), "ghost", UserRole::Viewer)
            .unwrap();
        assert!(matches!(
            refresh(State(state.clone()), refresh_body(&ghost.refresh_token))
                .await
                .unwrap_err(),
            AuthError::UserInvalid(_)
        ));

        let admin = state
            .user_store
            .find_active_by_username("admin")
            .unwrap()
            .unwrap();
        let user = state
            .user_store
            .create_user("idle", "idle@example.com", "password", UserRole::Employee, None)
            .unwrap();
        let pair = state
            .tokens
            .issue_token_pair(&user.id, &user.username, user.role)
            .unwrap();
        let disable = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        state
            .user_store
            .update_user(&user.id, &disable, &admin.id)
            .unwrap();

        assert_eq!(
            refresh(State(state), refresh_body(&pair.refresh_token))
                .await
                .unwrap_err(),
            AuthError::UserInactive
        );
    }

    #[tokio::test]
    async fn test_logout_without_identity_still_succeeds() {
        let Json(resp) = logout(MaybeAuth(None)).await;
        assert_eq!(resp.code, 200);

        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            role: UserRole::Viewer,
        };
        let Json(resp) = logout(MaybeAuth(Some(ctx))).await;
        assert_eq!(resp.code, 200);
        assert!(resp.data.is_none());
    }
}
