//! Role-based access control gate.
//!
//! A [`RoleGate`] carries the exact set of roles a route accepts. The gate
//! does no hierarchy inference: [`RoleGate::at_least`] flattens the role
//! hierarchy into an explicit set when the route is registered.

use crate::auth::{
    error::AuthError,
    models::{AuthContext, UserRole},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Arc<[UserRole]>,
}

impl RoleGate {
    /// Accept exactly the listed roles.
    pub fn only(roles: &[UserRole]) -> Self {
        Self {
            allowed: roles.into(),
        }
    }

    /// Accept `minimum` and every role above it.
    pub fn at_least(minimum: UserRole) -> Self {
        let roles: Vec<UserRole> = UserRole::ALL
            .into_iter()
            .filter(|role| role.covers(minimum))
            .collect();
        Self {
            allowed: roles.into(),
        }
    }

    pub fn allowed(&self) -> &[UserRole] {
        &self.allowed
    }

    pub fn authorize(&self, ctx: Option<&AuthContext>) -> Result<(), AuthError> {
        let ctx = ctx.ok_or_else(|| AuthError::Forbidden("User role not found".to_string()))?;

        if self.allowed.contains(&ctx.role) {
            Ok(())
        } else {
            warn!(
                user_id = %ctx.user_id,
                username = %ctx.username,
                role = %ctx.role,
                "Role not permitted for route"
            );
            Err(AuthError::Forbidden("Insufficient permissions".to_string()))
        }
    }
}

/// Route layer enforcing a [`RoleGate`]. Must run after `auth_middleware`.
pub async fn require_roles(
    State(gate): State<RoleGate>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    gate.authorize(req.extensions().get::<AuthContext>())?;
    Ok(next.run(req).await)
}
