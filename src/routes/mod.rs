/// Router Module Index
///
/// Splits the HTTP surface by access policy. The split is enforced with
/// Axum layers in `create_router`, so a route cannot end up outside the
/// guard by accident.

/// Routes reachable without a session: health and the login entries.
pub mod public;

/// Locale-prefixed console pages. Every route here sits behind
/// `access::route_guard`.
pub mod console;
