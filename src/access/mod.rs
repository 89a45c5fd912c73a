//! Route-level access control: the static path → roles table and the guard
//! that evaluates it on every console navigation.

pub mod guard;
pub mod path_roles;

pub use guard::{Decision, GuardState, NavigationOutcome, RouteGuard, route_guard};
pub use path_roles::{PathRoleMap, RoutePattern, locale_of, normalize_path};
