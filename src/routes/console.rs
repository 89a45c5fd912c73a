use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, patch, post},
};

/// Console Router Module
///
/// Locale-prefixed console pages. Role checks happen in the guard layer
/// applied in `create_router`; handlers receive the already-resolved
/// `Actor`.
pub fn console_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Listings (role-dispatched, paginated) ---
        .route("/{locale}/students", get(handlers::list_students))
        .route("/{locale}/students/{id}", delete(handlers::delete_student))
        .route(
            "/{locale}/class/{class_id}/students",
            get(handlers::list_class_students),
        )
        .route("/{locale}/classes", get(handlers::list_classes))
        .route("/{locale}/departments", get(handlers::list_departments))
        .route("/{locale}/degrees", get(handlers::list_degrees))
        // POST creates and invalidates every cached certificate listing.
        .route(
            "/{locale}/certificates",
            get(handlers::list_certificates).post(handlers::create_certificate),
        )
        .route("/{locale}/wallets", get(handlers::list_wallets))
        // --- Notifications (infinite feed + session events) ---
        .route("/{locale}/notifications", get(handlers::list_notifications))
        .route("/{locale}/notifications/events", get(handlers::notification_events))
        .route(
            "/{locale}/notifications/{id}/read",
            patch(handlers::mark_notification_read),
        )
        // --- Session ---
        .route("/{locale}/profile", get(handlers::get_profile))
        .route("/{locale}/logout", post(handlers::logout))
}
