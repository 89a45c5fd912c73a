use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints that never pass through the route guard. The login entries live
/// here because the guard redirects anonymous callers to them.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for the load balancer.
        .route("/health", get(|| async { "ok" }))
        // GET /{locale}/login
        // Staff login entry (ADMIN, PDT, KHOA).
        .route("/{locale}/login", get(handlers::staff_login))
        // GET /{locale}/student/login
        // Student portal login entry.
        .route("/{locale}/student/login", get(handlers::student_login))
}
