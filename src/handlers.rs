use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream};
use reqwest::Method;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::{
    AppState,
    backend::MutationRequest,
    dispatch::{ListOperation, ListRequest, Page, PageToken, Sort},
    error::{ConsoleError, ErrorResponse, QueryError},
    events::ConsoleEvent,
    models::{
        Certificate, Class, CreateCertificateRequest, Degree, Department, LoginAudience,
        LoginEntry, Notification, NotificationFeed, Student, Wallet,
    },
    query::{QueryKey, QueryOutcome},
    role::{Actor, Role},
};

// --- Query Parameter Structs ---

/// ListParams
///
/// Query parameters accepted by every console listing. `page` is zero-based.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Zero-based page index.
    pub page: Option<u32>,
    /// Page size; the configured default when absent.
    pub size: Option<u32>,
    /// Free-text filter. Empty means no filter.
    pub search: Option<String>,
    /// `field` for ascending, `-field` for descending.
    pub sort: Option<String>,
}

impl ListParams {
    fn into_request(
        self,
        operation: ListOperation,
        default_size: u32,
    ) -> Result<ListRequest, ConsoleError> {
        let page = self.page.unwrap_or(0);
        if page > ListRequest::MAX_PAGE_INDEX {
            return Err(ConsoleError::InvalidRequest("page out of range"));
        }

        Ok(ListRequest::new(operation)
            .page(page)
            .size(self.size.filter(|size| *size > 0).unwrap_or(default_size))
            .filter("search", self.search.unwrap_or_default())
            .sort(self.sort.as_deref().and_then(Sort::parse)))
    }
}

/// FeedParams
///
/// Query parameters of the infinite notification feed.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeedParams {
    /// One-based page token returned as `next_cursor` by the previous call.
    pub cursor: Option<u32>,
    pub size: Option<u32>,
}

// --- Helpers ---

/// Runs a listing for the actor. A disabled query answers 204 without a body.
async fn list_for<T>(
    state: &AppState,
    actor: &Actor,
    request: ListRequest,
) -> Result<Response, ConsoleError>
where
    T: DeserializeOwned + Serialize + Send + Sync + 'static,
{
    let policy = state.query_policy();
    match state.dispatcher.list::<T>(actor, &request, &policy).await? {
        QueryOutcome::Disabled => Ok(StatusCode::NO_CONTENT.into_response()),
        QueryOutcome::Ready(page) => Ok(Json(page.as_ref()).into_response()),
    }
}

/// Rejects actors outside `allowed` the same way as a missing resource.
fn require_role(actor: &Actor, allowed: &[Role]) -> Result<(), ConsoleError> {
    match actor.role {
        Some(role) if allowed.contains(&role) => Ok(()),
        _ => Err(ConsoleError::NotFound),
    }
}

/// Runs a backend mutation, invalidates `affected` after it succeeds and
/// tells the actor's session about each invalidated prefix.
async fn mutate(
    state: &AppState,
    actor: &Actor,
    request: MutationRequest,
    affected: &[QueryKey],
) -> Result<serde_json::Value, ConsoleError> {
    let value = state
        .cache
        .mutate(state.backend.send(request), affected)
        .await?;

    if let Some(id) = actor.id {
        for prefix in affected {
            state.sessions.publish(
                id,
                ConsoleEvent::Invalidated {
                    prefix: prefix.parts().to_vec(),
                },
            );
        }
    }
    Ok(value)
}

// --- Listing Handlers ---

/// list_students
///
/// [Console Route] Students visible to the actor: all of them for ADMIN and
/// PDT, the actor's own department for KHOA.
#[utoipa::path(
    get,
    path = "/{locale}/students",
    params(("locale" = String, Path, description = "UI locale"), ListParams),
    responses(
        (status = 200, description = "Students", body = Page<Student>),
        (status = 204, description = "Query disabled for this actor"),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn list_students(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<ListParams>,
) -> Result<Response, ConsoleError> {
    let request = params.into_request(ListOperation::Students, state.config.default_page_size)?;
    list_for::<Student>(&state, &actor, request).await
}

/// list_class_students
///
/// [Console Route] Students of one class. The class id is the discriminating
/// parameter of the backend call.
#[utoipa::path(
    get,
    path = "/{locale}/class/{class_id}/students",
    params(
        ("locale" = String, Path, description = "UI locale"),
        ("class_id" = String, Path, description = "Class code"),
        ListParams
    ),
    responses(
        (status = 200, description = "Students of the class", body = Page<Student>),
        (status = 204, description = "Query disabled for this actor")
    )
)]
pub async fn list_class_students(
    State(state): State<AppState>,
    actor: Actor,
    Path((_locale, class_id)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> Result<Response, ConsoleError> {
    let request = params
        .into_request(ListOperation::ClassStudents, state.config.default_page_size)?
        .scope("class_id", class_id);
    list_for::<Student>(&state, &actor, request).await
}

#[utoipa::path(
    get,
    path = "/{locale}/classes",
    params(("locale" = String, Path, description = "UI locale"), ListParams),
    responses(
        (status = 200, description = "Classes", body = Page<Class>),
        (status = 204, description = "Query disabled for this actor")
    )
)]
pub async fn list_classes(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<ListParams>,
) -> Result<Response, ConsoleError> {
    let request = params.into_request(ListOperation::Classes, state.config.default_page_size)?;
    list_for::<Class>(&state, &actor, request).await
}

#[utoipa::path(
    get,
    path = "/{locale}/departments",
    params(("locale" = String, Path, description = "UI locale"), ListParams),
    responses(
        (status = 200, description = "Departments", body = Page<Department>),
        (status = 204, description = "Query disabled for this actor")
    )
)]
pub async fn list_departments(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<ListParams>,
) -> Result<Response, ConsoleError> {
    let request = params.into_request(ListOperation::Departments, state.config.default_page_size)?;
    list_for::<Department>(&state, &actor, request).await
}

/// list_degrees
///
/// [Console Route] Degrees. Students only ever see their own.
#[utoipa::path(
    get,
    path = "/{locale}/degrees",
    params(("locale" = String, Path, description = "UI locale"), ListParams),
    responses(
        (status = 200, description = "Degrees", body = Page<Degree>),
        (status = 204, description = "Query disabled for this actor")
    )
)]
pub async fn list_degrees(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<ListParams>,
) -> Result<Response, ConsoleError> {
    let request = params.into_request(ListOperation::Degrees, state.config.default_page_size)?;
    list_for::<Degree>(&state, &actor, request).await
}

#[utoipa::path(
    get,
    path = "/{locale}/certificates",
    params(("locale" = String, Path, description = "UI locale"), ListParams),
    responses(
        (status = 200, description = "Certificates", body = Page<Certificate>),
        (status = 204, description = "Query disabled for this actor")
    )
)]
pub async fn list_certificates(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<ListParams>,
) -> Result<Response, ConsoleError> {
    let request =
        params.into_request(ListOperation::Certificates, state.config.default_page_size)?;
    list_for::<Certificate>(&state, &actor, request).await
}

#[utoipa::path(
    get,
    path = "/{locale}/wallets",
    params(("locale" = String, Path, description = "UI locale"), ListParams),
    responses(
        (status = 200, description = "Wallets", body = Page<Wallet>),
        (status = 204, description = "Query disabled for this actor")
    )
)]
pub async fn list_wallets(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<ListParams>,
) -> Result<Response, ConsoleError> {
    let request = params.into_request(ListOperation::Wallets, state.config.default_page_size)?;
    list_for::<Wallet>(&state, &actor, request).await
}

/// list_notifications
///
/// [Console Route] One page of the actor's notification feed. Clients pass
/// the returned `next_cursor` back to load more and stop when it is absent.
#[utoipa::path(
    get,
    path = "/{locale}/notifications",
    params(("locale" = String, Path, description = "UI locale"), FeedParams),
    responses(
        (status = 200, description = "Notification feed page", body = NotificationFeed),
        (status = 204, description = "Query disabled for this actor")
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<FeedParams>,
) -> Result<Response, ConsoleError> {
    let request = ListRequest::new(ListOperation::Notifications).size(
        params
            .size
            .filter(|size| *size > 0)
            .unwrap_or(state.config.default_page_size),
    );
    let token = params.cursor.map(|cursor| PageToken(cursor.max(1))).unwrap_or_default();

    let outcome = state
        .dispatcher
        .list_page::<Notification>(&actor, &request, token, &state.query_policy())
        .await?;

    match outcome {
        QueryOutcome::Disabled => Ok(StatusCode::NO_CONTENT.into_response()),
        QueryOutcome::Ready(page) => Ok(Json(NotificationFeed {
            items: page.envelope.items.clone(),
            meta: page.envelope.meta,
            next_cursor: page.next_token,
        })
        .into_response()),
    }
}

/// notification_events
///
/// [Console Route] Server-sent stream of the actor's session events. The
/// stream ends when the actor logs out.
#[utoipa::path(
    get,
    path = "/{locale}/notifications/events",
    params(("locale" = String, Path, description = "UI locale")),
    responses((status = 200, description = "text/event-stream of ConsoleEvent"))
)]
pub async fn notification_events(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ConsoleError> {
    let id = actor.id.ok_or(ConsoleError::Unauthorized)?;
    // Dropped with the stream when the client disconnects, which releases
    // the actor's channel if nobody else listens.
    let subscription = state
        .sessions
        .subscribe(id)
        .ok_or(ConsoleError::Unauthorized)?;

    let events = stream::unfold(subscription, |mut subscription| async move {
        loop {
            match subscription.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().comment("unserializable event"));
                    return Some((Ok(sse), subscription));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// --- Mutation Handlers ---

/// create_certificate
///
/// [Console Route] Issues a certificate through the backend. Cached
/// certificate listings are dropped only after the backend confirms.
#[utoipa::path(
    post,
    path = "/{locale}/certificates",
    params(("locale" = String, Path, description = "UI locale")),
    request_body = CreateCertificateRequest,
    responses(
        (status = 201, description = "Created", body = Certificate),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 422, description = "Rejected by the backend", body = ErrorResponse)
    )
)]
pub async fn create_certificate(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateCertificateRequest>,
) -> Result<(StatusCode, Json<Certificate>), ConsoleError> {
    require_role(&actor, &[Role::Admin, Role::Pdt, Role::Khoa])?;

    let body = serde_json::to_value(&payload).map_err(QueryError::decode)?;
    let request = MutationRequest {
        method: Method::POST,
        path: "/certificates".to_string(),
        body: Some(body),
        bearer: actor.token.clone(),
    };

    let created = mutate(
        &state,
        &actor,
        request,
        &[QueryKey::new(ListOperation::Certificates.name())],
    )
    .await?;
    let certificate = serde_json::from_value(created).map_err(QueryError::decode)?;
    Ok((StatusCode::CREATED, Json(certificate)))
}

/// delete_student
///
/// [Console Route] Removes a student. Both the flat and the per-class student
/// listings are invalidated.
#[utoipa::path(
    delete,
    path = "/{locale}/students/{id}",
    params(
        ("locale" = String, Path, description = "UI locale"),
        ("id" = Uuid, Path, description = "Student ID")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn delete_student(
    State(state): State<AppState>,
    actor: Actor,
    Path((_locale, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ConsoleError> {
    require_role(&actor, &[Role::Admin, Role::Pdt])?;

    let request = MutationRequest {
        method: Method::DELETE,
        path: format!("/students/{id}"),
        body: None,
        bearer: actor.token.clone(),
    };
    mutate(
        &state,
        &actor,
        request,
        &[
            QueryKey::new(ListOperation::Students.name()),
            QueryKey::new(ListOperation::ClassStudents.name()),
        ],
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    patch,
    path = "/{locale}/notifications/{id}/read",
    params(
        ("locale" = String, Path, description = "UI locale"),
        ("id" = Uuid, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Marked as read"),
        (status = 404, description = "Not found or not yours", body = ErrorResponse)
    )
)]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    actor: Actor,
    Path((_locale, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ConsoleError> {
    let request = MutationRequest {
        method: Method::PATCH,
        path: format!("/notifications/{id}/read"),
        body: None,
        bearer: actor.token.clone(),
    };
    mutate(
        &state,
        &actor,
        request,
        &[QueryKey::new(ListOperation::Notifications.name())],
    )
    .await?;
    Ok(StatusCode::OK)
}

// --- Session Handlers ---

/// get_profile
///
/// [Console Route] The actor the request was resolved to.
#[utoipa::path(
    get,
    path = "/{locale}/profile",
    params(("locale" = String, Path, description = "UI locale")),
    responses((status = 200, description = "Current actor", body = Actor))
)]
pub async fn get_profile(actor: Actor) -> Json<Actor> {
    Json(actor)
}

/// logout
///
/// [Console Route] Ends the actor's session scope: closes its event channel
/// and drops its cached personal listings.
#[utoipa::path(
    post,
    path = "/{locale}/logout",
    params(("locale" = String, Path, description = "UI locale")),
    responses((status = 204, description = "Session scope cleared"))
)]
pub async fn logout(State(state): State<AppState>, actor: Actor) -> StatusCode {
    let forgotten = state.dispatcher.forget(&actor);
    if let Some(id) = actor.id {
        state.sessions.end(id);
    }
    tracing::info!(actor = ?actor.id, forgotten, "actor logged out");
    StatusCode::NO_CONTENT
}

// --- Public Handlers ---

fn login_entry(state: &AppState, locale: String, audience: LoginAudience) -> Response {
    let locale = locale.to_ascii_lowercase();
    if !state.config.locales.contains(&locale) {
        return crate::access::guard::not_found();
    }
    let path = match audience {
        LoginAudience::Staff => format!("/{locale}/login"),
        LoginAudience::Student => format!("/{locale}/student/login"),
    };
    Json(LoginEntry {
        locale,
        audience,
        path,
    })
    .into_response()
}

#[utoipa::path(
    get,
    path = "/{locale}/login",
    params(("locale" = String, Path, description = "UI locale")),
    responses(
        (status = 200, description = "Staff login entry", body = LoginEntry),
        (status = 404, description = "Unknown locale", body = ErrorResponse)
    )
)]
pub async fn staff_login(State(state): State<AppState>, Path(locale): Path<String>) -> Response {
    login_entry(&state, locale, LoginAudience::Staff)
}

#[utoipa::path(
    get,
    path = "/{locale}/student/login",
    params(("locale" = String, Path, description = "UI locale")),
    responses(
        (status = 200, description = "Student login entry", body = LoginEntry),
        (status = 404, description = "Unknown locale", body = ErrorResponse)
    )
)]
pub async fn student_login(State(state): State<AppState>, Path(locale): Path<String>) -> Response {
    login_entry(&state, locale, LoginAudience::Student)
}
