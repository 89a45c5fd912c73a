use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::path_roles::{PathRoleMap, locale_of};
use crate::{
    config::AppConfig,
    error::ErrorResponse,
    role::{Actor, Role},
};

/// Decision
///
/// Outcome of a pure authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// NavigationOutcome
///
/// What the console does with a navigation once session state is taken into
/// account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Mount the page.
    Render,
    /// The role may not see the page. Reported exactly like a missing page.
    NotFound,
    /// No session: send the caller to the matching login entry.
    RedirectToLogin(String),
    /// The session is still resolving; decide later.
    Deferred,
}

const STAFF_LOGIN: &str = "/login";
const STUDENT_LOGIN: &str = "/student/login";

/// RouteGuard
///
/// Decides, on every navigation, whether the current actor may view a
/// console path. Synchronous and side-effect free.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    map: PathRoleMap,
    default_locale: String,
}

/// Shared handle stored in the application state.
pub type GuardState = Arc<RouteGuard>;

impl RouteGuard {
    pub fn new(map: PathRoleMap, default_locale: impl Into<String>) -> Self {
        Self {
            map,
            default_locale: default_locale.into(),
        }
    }

    pub fn map(&self) -> &PathRoleMap {
        &self.map
    }

    /// authorize
    ///
    /// Allows unless the most specific matching pattern restricts the path and
    /// `role` is absent or not in its allowed set. Unlisted paths are
    /// unrestricted.
    pub fn authorize(&self, path: &str, role: Option<Role>) -> Decision {
        let normalized = self.map.normalize(path);
        match self.map.lookup(&normalized) {
            None => Decision::Allow,
            Some(pattern) if pattern.is_unrestricted() => Decision::Allow,
            Some(pattern) => match role {
                Some(role) if pattern.permits(role) => Decision::Allow,
                _ => Decision::Deny,
            },
        }
    }

    /// Same as [`RouteGuard::authorize`] for a role name as supplied by the
    /// session source. The name is upper-cased before lookup.
    pub fn authorize_role_name(&self, path: &str, role: Option<&str>) -> Decision {
        match role {
            None => self.authorize(path, None),
            Some(name) => match Role::parse(name) {
                Some(role) => self.authorize(path, Some(role)),
                // An unknown role may still open unrestricted pages.
                None => self.authorize(path, None),
            },
        }
    }

    /// navigate
    ///
    /// Full navigation decision for a locale-prefixed console path. A path
    /// whose first segment is not a configured locale does not exist.
    /// Otherwise: deferred while the session loads, login entries always
    /// render, anonymous callers are redirected to a login entry, and
    /// everyone else goes through [`RouteGuard::authorize`].
    pub fn navigate(&self, path: &str, actor: &Actor) -> NavigationOutcome {
        if locale_of(path, self.map.locales()).is_none() {
            return NavigationOutcome::NotFound;
        }

        if actor.is_loading() {
            return NavigationOutcome::Deferred;
        }

        let normalized = self.map.normalize(path);
        if normalized == STAFF_LOGIN || normalized == STUDENT_LOGIN {
            return NavigationOutcome::Render;
        }

        if !actor.is_authenticated() {
            return NavigationOutcome::RedirectToLogin(self.login_entry(path));
        }

        match self.authorize(path, actor.role) {
            Decision::Allow => NavigationOutcome::Render,
            Decision::Deny => NavigationOutcome::NotFound,
        }
    }

    /// The login page matching the area of `path`: the student portal for
    /// paths under `/student`, the staff login otherwise. The locale of the
    /// original path is kept.
    pub fn login_entry(&self, path: &str) -> String {
        let locale = locale_of(path, self.map.locales()).unwrap_or(&self.default_locale);
        let normalized = self.map.normalize(path);
        let student_area = normalized == "/student" || normalized.starts_with("/student/");
        let entry = if student_area { STUDENT_LOGIN } else { STAFF_LOGIN };
        format!("/{}{}", locale.to_ascii_lowercase(), entry)
    }
}

/// The response for anything the caller may not know exists.
pub fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            message: "not found".to_string(),
        }),
    )
        .into_response()
}

/// route_guard
///
/// Middleware applied to every console route. It resolves the actor once,
/// stores it in the request extensions for the handler, and turns the
/// navigation outcome into a response.
pub async fn route_guard<S>(
    State(state): State<S>,
    actor: Actor,
    mut request: Request,
    next: Next,
) -> Response
where
    S: Clone + Send + Sync + 'static,
    GuardState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    let guard = GuardState::from_ref(&state);
    let path = request.uri().path().to_string();
    let outcome = guard.navigate(&path, &actor);

    tracing::debug!(
        path = %path,
        role = ?actor.role,
        outcome = ?outcome,
        "route guard decision"
    );

    match outcome {
        NavigationOutcome::Render => {
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        NavigationOutcome::NotFound => not_found(),
        NavigationOutcome::RedirectToLogin(location) => {
            Redirect::temporary(&location).into_response()
        }
        NavigationOutcome::Deferred => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use uuid::Uuid;

    use super::*;

    fn guard() -> RouteGuard {
        let locales = vec!["vi".to_string(), "en".to_string()];
        RouteGuard::new(PathRoleMap::console(locales), "vi")
    }

    fn staff(role: Role) -> Actor {
        Actor::authenticated(Uuid::new_v4(), Some(role))
    }

    #[test]
    fn khoa_may_open_class_students() {
        let decision = guard().authorize("/vi/class/10A1/students", Some(Role::Khoa));
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn admin_may_not_open_class_students() {
        let decision = guard().authorize("/vi/class/10A1/students", Some(Role::Admin));
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn restricted_path_denies_missing_role() {
        assert_eq!(guard().authorize("/en/wallets", None), Decision::Deny);
    }

    #[test]
    fn unlisted_path_is_unrestricted() {
        assert_eq!(guard().authorize("/vi/help", None), Decision::Allow);
    }

    #[test]
    fn role_names_are_upper_cased() {
        let guard = guard();
        assert_eq!(guard.authorize_role_name("/vi/wallets", Some("admin")), Decision::Allow);
        assert_eq!(guard.authorize_role_name("/vi/wallets", Some("pdt")), Decision::Deny);
        assert_eq!(guard.authorize_role_name("/vi/wallets", Some("dean")), Decision::Deny);
    }

    #[test]
    fn loading_session_defers() {
        let outcome = guard().navigate("/vi/wallets", &Actor::loading());
        assert_eq!(outcome, NavigationOutcome::Deferred);
    }

    #[test]
    fn denied_role_sees_not_found() {
        let outcome = guard().navigate("/vi/wallets", &staff(Role::Khoa));
        assert_eq!(outcome, NavigationOutcome::NotFound);
    }

    #[test]
    fn anonymous_staff_page_redirects_to_staff_login() {
        let outcome = guard().navigate("/en/degrees", &Actor::anonymous());
        assert_eq!(outcome, NavigationOutcome::RedirectToLogin("/en/login".to_string()));
    }

    #[test]
    fn anonymous_student_page_redirects_to_student_login() {
        let outcome = guard().navigate("/en/student/degrees", &Actor::anonymous());
        assert_eq!(
            outcome,
            NavigationOutcome::RedirectToLogin("/en/student/login".to_string())
        );
    }

    #[test]
    fn unknown_locale_is_not_found_for_everyone() {
        let guard = guard();
        for path in ["/xx/wallets", "/xx/profile", "/student/degrees", "/"] {
            assert_eq!(guard.navigate(path, &staff(Role::Admin)), NavigationOutcome::NotFound);
            assert_eq!(guard.navigate(path, &Actor::anonymous()), NavigationOutcome::NotFound);
            assert_eq!(guard.navigate(path, &Actor::loading()), NavigationOutcome::NotFound);
        }
    }

    #[test]
    fn configured_locales_match_case_insensitively() {
        let outcome = guard().navigate("/EN/wallets", &staff(Role::Admin));
        assert_eq!(outcome, NavigationOutcome::Render);
    }

    #[test]
    fn login_pages_render_for_anonymous() {
        let guard = guard();
        assert_eq!(guard.navigate("/vi/login", &Actor::anonymous()), NavigationOutcome::Render);
        assert_eq!(
            guard.navigate("/en/student/login", &Actor::anonymous()),
            NavigationOutcome::Render
        );
    }

    #[test]
    fn open_pages_allow_missing_role() {
        let guard = guard();
        for path in ["/vi/profile", "/en/logout", "/vi/notifications", "/vi/notifications/x/read"] {
            assert_eq!(guard.authorize(path, None), Decision::Allow, "{path}");
        }
    }

    fn role() -> impl Strategy<Value = Option<Role>> {
        proptest::option::of(proptest::sample::select(Role::ALL.to_vec()))
    }

    fn console_path() -> impl Strategy<Value = String> {
        let segment = prop_oneof![
            Just("vi".to_string()),
            Just("students".to_string()),
            Just("class".to_string()),
            Just("student".to_string()),
            Just("notifications".to_string()),
            Just("wallets".to_string()),
            "[a-z0-9]{1,5}",
        ];
        proptest::collection::vec(segment, 0..6).prop_map(|parts| format!("/{}", parts.join("/")))
    }

    proptest! {
        #[test]
        fn open_patterns_allow_every_role(
            locale in prop_oneof![Just("vi"), Just("en")],
            page in prop_oneof![
                Just("profile".to_string()),
                Just("logout".to_string()),
                Just("login".to_string()),
                Just("student/login".to_string()),
                "notifications(/[a-z0-9]{1,5}){0,3}",
            ],
            role in role(),
        ) {
            let path = format!("/{locale}/{page}");
            prop_assert_eq!(guard().authorize(&path, role), Decision::Allow);
        }

        #[test]
        fn authorize_is_deterministic(path in console_path(), role in role()) {
            let first = guard();
            let second = guard();
            let decision = first.authorize(&path, role);
            prop_assert_eq!(first.authorize(&path, role), decision);
            prop_assert_eq!(second.authorize(&path, role), decision);
        }

        #[test]
        fn normalized_and_raw_paths_get_the_same_decision(
            path in console_path(),
            role in role(),
        ) {
            let guard = guard();
            let normalized = guard.map().normalize(&path);
            prop_assert_eq!(guard.authorize(&normalized, role), guard.authorize(&path, role));
        }
    }
}
