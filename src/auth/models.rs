//! Authentication Models
//! Credentials, roles, token claims and the request-scoped identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Persisted user account with its password digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt digest - never serialize
    pub role: UserRole,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    Employee,
    Viewer,
}

impl UserRole {
    pub const ALL: [UserRole; 4] = [
        UserRole::Admin,
        UserRole::Manager,
        UserRole::Employee,
        UserRole::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Employee => "employee",
            UserRole::Viewer => "viewer",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            UserRole::Admin => 3,
            UserRole::Manager => 2,
            UserRole::Employee => 1,
            UserRole::Viewer => 0,
        }
    }

    /// Whether this role carries at least the permissions of `required`.
    /// Admin covers everything, viewer only itself.
    pub fn covers(&self, required: UserRole) -> bool {
        self.rank() >= required.rank()
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid user role: {0:?}")]
pub struct InvalidRole(pub String);

impl FromStr for UserRole {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "manager" => Ok(UserRole::Manager),
            "employee" => Ok(UserRole::Employee),
            "viewer" => Ok(UserRole::Viewer),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

/// JWT Claims payload. Access and refresh tokens share this shape and
/// differ only in `exp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: String, // subject (credential id)
    pub username: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
}

/// Identity of the caller for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
    pub role: UserRole,
}

impl AuthContext {
    pub fn from_claims(claims: &TokenClaims) -> Option<Self> {
        let user_id = Uuid::parse_str(&claims.sub).ok()?;
        Some(Self {
            user_id,
            username: claims.username.clone(),
            role: claims.role,
        })
    }
}

/// Login request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Refresh request body
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token pair as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64, // seconds until the access token expires
    pub token_type: String,
}

/// Success envelope shared by every JSON endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::with_code(200, message, data)
    }

    pub fn with_code(code: u16, message: impl Into<String>, data: T) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: 200,
            message: message.into(),
            data: None,
        }
    }
}

/// Error envelope: `{code, message, error}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// User response (sanitized)
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for UserResponse {
    fn from(user: &Credential) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            is_active: user.is_active,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role_serialization() {
        let admin = UserRole::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let manager: UserRole = serde_json::from_str(r#""manager""#).unwrap();
        assert_eq!(manager, UserRole::Manager);

        assert!(serde_json::from_str::<UserRole>(r#""superuser""#).is_err());
        assert!(serde_json::from_str::<UserRole>(r#""Admin""#).is_err());
    }

    #[test]
    fn test_user_role_string_conversion() {
        for role in UserRole::ALL {
            assert_eq!(role.as_str().parse::<UserRole>(), Ok(role));
        }
        assert_eq!(
            "root".parse::<UserRole>(),
            Err(InvalidRole("root".to_string()))
        );
    }

    #[test]
    fn test_role_hierarchy() {
        assert!(UserRole::Admin.covers(UserRole::Viewer));
        assert!(UserRole::Manager.covers(UserRole::Employee));
        assert!(UserRole::Employee.covers(UserRole::Employee));
        assert!(!UserRole::Viewer.covers(UserRole::Employee));
        assert!(!UserRole::Manager.covers(UserRole::Admin));
    }

    #[test]
    fn test_auth_context_requires_uuid_subject() {
        let mut claims = TokenClaims {
            sub: Uuid::new_v4().to_string(),
            username: "alice".to_string(),
            role: UserRole::Employee,
            iat: 0,
            exp: 0,
            nbf: 0,
            iss: "xcloud".to_string(),
        };
        let ctx = AuthContext::from_claims(&claims).unwrap();
        assert_eq!(ctx.username, "alice");
        assert_eq!(ctx.role, UserRole::Employee);

        claims.sub = "not-a-uuid".to_string();
        assert!(AuthContext::from_claims(&claims).is_none());
    }

    #[test]
    fn test_message_envelope_omits_data() {
        let json = serde_json::to_value(ApiResponse::message("bye")).unwrap();
        assert_eq!(json, serde_json::json!({"code": 200, "message": "bye"}));
    }
}
