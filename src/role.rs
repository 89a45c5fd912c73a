use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

/// Role
///
/// The console's access roles. Exactly one is active per authenticated
/// session.
/// - `Admin`: system administrator.
/// - `Pdt`: academic affairs office (Phòng Đào tạo), university-wide staff.
/// - `Khoa`: faculty/department staff, scoped to one department.
/// - `Student`: a student viewing their own records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export)]
pub enum Role {
    Admin,
    Pdt,
    Khoa,
    Student,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Pdt, Role::Khoa, Role::Student];

    /// Resolves a role name case-insensitively. Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Self::Admin),
            "PDT" => Some(Self::Pdt),
            "KHOA" => Some(Self::Khoa),
            "STUDENT" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Pdt => "PDT",
            Self::Khoa => "KHOA",
            Self::Student => "STUDENT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SessionStatus
///
/// Where the identity source is in resolving the caller. `Loading` means a
/// decision must be deferred, never that access is denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SessionStatus {
    Loading,
    Anonymous,
    Authenticated,
}

/// Actor
///
/// The explicitly passed "current actor" context. The route guard and the
/// dispatchers take an `&Actor` instead of reading ambient session state,
/// so their decisions are a pure function of their inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct Actor {
    pub id: Option<Uuid>,
    pub role: Option<Role>,
    /// The department a `KHOA` actor administers.
    pub department_id: Option<String>,
    pub status: SessionStatus,
    /// Bearer token forwarded to the backend on this actor's behalf.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            role: None,
            department_id: None,
            status: SessionStatus::Anonymous,
            token: None,
        }
    }

    pub fn loading() -> Self {
        Self {
            status: SessionStatus::Loading,
            ..Self::anonymous()
        }
    }

    pub fn authenticated(id: Uuid, role: Option<Role>) -> Self {
        Self {
            id: Some(id),
            role,
            department_id: None,
            status: SessionStatus::Authenticated,
            token: None,
        }
    }

    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Role::parse("khoa"), Some(Role::Khoa));
        assert_eq!(Role::parse(" Pdt "), Some(Role::Pdt));
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("dean"), None);
    }

    #[test]
    fn role_serializes_upper_case() {
        let json = serde_json::to_string(&Role::Student).unwrap();
        assert_eq!(json, "\"STUDENT\"");
    }

    #[test]
    fn loading_actor_is_not_authenticated() {
        let actor = Actor::loading();
        assert!(actor.is_loading());
        assert!(!actor.is_authenticated());
        assert_eq!(actor.role, None);
    }
}
