//! XCloud Backend Library
//!
//! Authentication, authorization and user administration for the XCloud
//! account/settlement platform. `main.rs` wires these into a server; tests
//! drive [`build_router`] directly.

pub mod api;
pub mod auth;
pub mod config;
pub mod middleware;

use crate::auth::{
    api as auth_api, auth_middleware, require_roles, AuthState, RoleGate, UserRole,
};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};

/// Every API route lives under this prefix.
pub const API_PREFIX: &str = "/api/v1";

/// Assemble the full application router.
pub fn build_router(state: AuthState) -> Router {
    // Public auth routes
    let public_routes = Router::new()
        .route("/auth/login", post(auth_api::login))
        .route("/auth/refresh", post(auth_api::refresh));

    let admin_routes = Router::new()
        .route("/users", get(api::users::list_users).post(api::users::create_user))
        .route(
            "/users/:id",
            put(api::users::update_user).delete(api::users::delete_user),
        )
        .route_layer(from_fn_with_state(
            RoleGate::only(&[UserRole::Admin]),
            require_roles,
        ));

    // Everything here needs a valid access token; admin routes are merged
    // first so the auth layer wraps the role gate.
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth_api::logout))
        .route("/users/profile", get(api::users::get_profile))
        .route("/users/change-password", post(api::users::change_password))
        .merge(admin_routes)
        .route_layer(from_fn_with_state(state.tokens.clone(), auth_middleware));

    let api_routes = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state);

    Router::new()
        .route("/health", get(api::health_check))
        .nest(API_PREFIX, api_routes)
        .layer(from_fn(middleware::request_logging))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
}
