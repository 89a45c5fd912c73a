use axum::{
    Router,
    body::Body,
    extract::FromRef,
    http::{HeaderName, Request},
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Session and access control.
pub mod access;
pub mod auth;
pub mod role;

// Data access: backend client, query cache, role-dispatched listings.
pub mod backend;
pub mod dispatch;
pub mod query;

// Client-side state models.
pub mod events;
pub mod filter_state;
pub mod selection;

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

// Module for routing segregation (Public, Console).
pub mod routes;
use routes::{console, public};

// --- Public Re-exports ---

pub use access::{GuardState, PathRoleMap, RouteGuard, route_guard};
pub use backend::{Backend, BackendState, HttpBackend};
pub use config::AppConfig;
pub use dispatch::{DispatchTable, PaginatedDispatcher};
pub use events::{SessionRegistry, SessionState};
pub use query::{CacheState, QueryCache, QueryPolicy};

/// ApiDoc
///
/// OpenAPI document for the console server, served at
/// `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_students, handlers::list_class_students, handlers::list_classes,
        handlers::list_departments, handlers::list_degrees, handlers::list_certificates,
        handlers::list_wallets, handlers::list_notifications, handlers::notification_events,
        handlers::create_certificate, handlers::delete_student,
        handlers::mark_notification_read, handlers::get_profile, handlers::logout,
        handlers::staff_login, handlers::student_login
    ),
    components(
        schemas(
            models::Student, models::Class, models::Department, models::Degree,
            models::Certificate, models::Wallet, models::Notification, models::IssueStatus,
            models::CreateCertificateRequest, models::NotificationFeed, models::LoginEntry,
            models::LoginAudience, dispatch::PageMeta, dispatch::PageToken, dispatch::Sort,
            events::ConsoleEvent, role::Actor, role::Role, role::SessionStatus,
            error::ErrorResponse,
        )
    ),
    tags(
        (name = "cert-console", description = "Certificate administration console API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, cheaply clonable container of every service the console needs.
#[derive(Clone)]
pub struct AppState {
    /// REST backend client.
    pub backend: BackendState,
    /// Process-wide query cache shared by every dispatcher.
    pub cache: CacheState,
    /// Role-dispatched listing service, bound to `backend` and `cache`.
    pub dispatcher: PaginatedDispatcher,
    pub guard: GuardState,
    /// Per-actor event channels.
    pub sessions: SessionState,
    pub config: AppConfig,
}

impl AppState {
    /// new
    ///
    /// Wires the default console tables (path-role map, dispatch table)
    /// around `backend` using the locales from `config`.
    pub fn new(config: AppConfig, backend: BackendState) -> Self {
        let cache = CacheState::default();
        let dispatcher =
            PaginatedDispatcher::new(backend.clone(), cache.clone(), DispatchTable::console());
        let guard = GuardState::new(RouteGuard::new(
            PathRoleMap::console(config.locales.clone()),
            config.default_locale.clone(),
        ));

        Self {
            backend,
            cache,
            dispatcher,
            guard,
            sessions: SessionState::default(),
            config,
        }
    }

    /// Cache policy for console listings: cached for the session unless a
    /// staleness window is configured, never retried.
    pub fn query_policy(&self) -> QueryPolicy {
        QueryPolicy::default().stale_after(self.config.query_stale_after)
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for BackendState {
    fn from_ref(app_state: &AppState) -> BackendState {
        app_state.backend.clone()
    }
}

impl FromRef<AppState> for CacheState {
    fn from_ref(app_state: &AppState) -> CacheState {
        app_state.cache.clone()
    }
}

impl FromRef<AppState> for GuardState {
    fn from_ref(app_state: &AppState) -> GuardState {
        app_state.guard.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles public and guarded console routes, the OpenAPI UI and the
/// observability layers.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        // Console Routes: every navigation goes through the route guard,
        // which resolves the actor once and hands it to the handler.
        .merge(
            console::console_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                route_guard::<AppState>,
            )),
        )
        // Unknown paths look exactly like role-restricted ones.
        .fallback(|| async { access::guard::not_found() })
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for every request, carrying the `x-request-id` set by
/// `SetRequestIdLayer` so all log lines of one request correlate.
fn trace_span_logger(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
