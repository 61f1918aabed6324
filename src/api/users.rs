//! User management endpoints.
//!
//! Profile and password change are open to any authenticated caller; the
//! rest is registered behind an admin-only [`RoleGate`](crate::auth::RoleGate).

use crate::auth::{
    api::AuthState,
    models::{ApiResponse, AuthContext, ErrorResponse, UserResponse, UserRole},
    password::HashingError,
    user_store::{StoreError, UserUpdate},
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;
const MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

impl CreateUserRequest {
    fn validate(&self) -> Result<(), UserApiError> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_password(&self.password, "password")
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Raw paging parameters; unparseable values fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl PageQuery {
    pub fn resolve(&self) -> (u32, u32) {
        let page = self
            .page
            .as_deref()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&p| p >= 1)
            .unwrap_or(1);
        let page_size = self
            .page_size
            .as_deref()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        (page, page_size)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_page: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserListData {
    pub users: Vec<UserResponse>,
    pub pagination: PaginationInfo,
}

fn validate_username(username: &str) -> Result<(), UserApiError> {
    let len = username.chars().count();
    if !(3..=50).contains(&len) {
        return Err(UserApiError::BadRequest(
            "username must be 3-50 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), UserApiError> {
    let well_formed = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !well_formed || email.len() > 100 {
        return Err(UserApiError::BadRequest("invalid email address".to_string()));
    }
    Ok(())
}

/// Bounds are in bytes: bcrypt ignores input past its 72-byte limit.
fn validate_password(password: &str, field: &str) -> Result<(), UserApiError> {
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
        return Err(UserApiError::BadRequest(format!(
            "{field} must be {MIN_PASSWORD_LEN}-{MAX_PASSWORD_LEN} bytes"
        )));
    }
    Ok(())
}

fn parse_user_id(raw: &str) -> Result<Uuid, UserApiError> {
    Uuid::parse_str(raw).map_err(|_| UserApiError::InvalidUserId)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, UserApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| UserApiError::BadRequest(rejection.body_text()))
}

/// Current user - GET /api/v1/users/profile
pub async fn get_profile(
    State(state): State<AuthState>,
    ctx: AuthContext,
) -> Result<Json<ApiResponse<UserResponse>>, UserApiError> {
    let user = state
        .user_store
        .get_user_by_id(&ctx.user_id)?
        .ok_or(UserApiError::NotFound)?;

    Ok(Json(ApiResponse::ok("ok", UserResponse::from(&user))))
}

/// Change own password - POST /api/v1/users/change-password
pub async fn change_password(
    State(state): State<AuthState>,
    ctx: AuthContext,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, UserApiError> {
    let payload = body(payload)?;
    validate_password(&payload.new_password, "new password")?;

    state
        .user_store
        .change_password(&ctx.user_id, &payload.old_password, &payload.new_password)?;

    info!(username = %ctx.username, "Password changed");
    Ok(Json(ApiResponse::message("password changed")))
}

/// List users - GET /api/v1/users (Admin only)
pub async fn list_users(
    State(state): State<AuthState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<UserListData>>, UserApiError> {
    let (page, page_size) = query.resolve();
    let (users, total) = state.user_store.list_users(page, page_size)?;

    let data = UserListData {
        users: users.iter().map(UserResponse::from).collect(),
        pagination: PaginationInfo {
            page,
            page_size,
            total,
            total_page: total.div_ceil(u64::from(page_size)),
        },
    };

    Ok(Json(ApiResponse::ok("ok", data)))
}

/// Create user - POST /api/v1/users (Admin only)
pub async fn create_user(
    State(state): State<AuthState>,
    ctx: AuthContext,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>), UserApiError> {
    let payload = body(payload)?;
    payload.validate()?;

    let user = state.user_store.create_user(
        &payload.username,
        &payload.email,
        &payload.password,
        payload.role,
        Some(&ctx.user_id),
    )?;

    info!(
        username = %user.username,
        role = %user.role,
        created_by = %ctx.username,
        "User created"
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_code(
            201,
            "user created",
            UserResponse::from(&user),
        )),
    ))
}

/// Update user - PUT /api/v1/users/:id (Admin only)
pub async fn update_user(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Path(user_id): Path<String>,
    payload: Result<Json<UserUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<UserResponse>>, UserApiError> {
    let id = parse_user_id(&user_id)?;
    let update = body(payload)?;
    if let Some(username) = &update.username {
        validate_username(username)?;
    }
    if let Some(email) = &update.email {
        validate_email(email)?;
    }

    let user = state.user_store.update_user(&id, &update, &ctx.user_id)?;

    info!(username = %user.username, updated_by = %ctx.username, "User updated");
    Ok(Json(ApiResponse::ok("user updated", UserResponse::from(&user))))
}

/// Delete user - DELETE /api/v1/users/:id (Admin only)
pub async fn delete_user(
    State(state): State<AuthState>,
    ctx: AuthContext,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, UserApiError> {
    let id = parse_user_id(&user_id)?;
    if id == ctx.user_id {
        return Err(UserApiError::CannotDeleteSelf);
    }

    state.user_store.delete_user(&id, &ctx.user_id)?;

    info!(user_id = %id, deleted_by = %ctx.username, "User deleted");
    Ok(Json(ApiResponse::message("user deleted")))
}

/// User management errors
#[derive(Debug, Error)]
pub enum UserApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid user id")]
    InvalidUserId,
    #[error("cannot delete your own account")]
    CannotDeleteSelf,
    #[error("user not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal,
}

impl From<StoreError> for UserApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => UserApiError::NotFound,
            StoreError::UsernameTaken | StoreError::EmailTaken => {
                UserApiError::Conflict(err.to_string())
            }
            StoreError::WrongPassword | StoreError::Hashing(HashingError::TooLong) => {
                UserApiError::BadRequest(err.to_string())
            }
            StoreError::Hashing(_) | StoreError::Database(_) => {
                error!(error = %err, "User store failure");
                UserApiError::Internal
            }
        }
    }
}

impl IntoResponse for UserApiError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match self {
            UserApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "invalid request parameters", Some(detail))
            }
            UserApiError::InvalidUserId => (StatusCode::BAD_REQUEST, "invalid user id", None),
            UserApiError::CannotDeleteSelf => {
                (StatusCode::BAD_REQUEST, "cannot delete your own account", None)
            }
            UserApiError::NotFound => (StatusCode::NOT_FOUND, "user not found", None),
            UserApiError::Conflict(detail) => {
                (StatusCode::CONFLICT, "user already exists", Some(detail))
            }
            UserApiError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error", None)
            }
        };

        if status.is_client_error() {
            warn!(status = status.as_u16(), reason = message, "User request rejected");
        }

        let body = ErrorResponse {
            code: status.as_u16(),
            message: message.to_string(),
            error: detail,
        };
        (status, Json(body)).into_response()
    }
}
