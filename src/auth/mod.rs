//! Authentication Module
//! Bearer tokens, password credentials and role-based access control.

pub mod api;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod rbac;
pub mod user_store;

pub use api::AuthState;
pub use error::AuthError;
pub use jwt::{TokenService, ValidationMode};
pub use middleware::{auth_middleware, MaybeAuth};
pub use models::{AuthContext, Credential, TokenClaims, UserRole};
pub use password::PasswordHasher;
pub use rbac::{require_roles, RoleGate};
pub use user_store::UserStore;
