use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::role::Role;

/// ListOperation
///
/// A logical listing as the UI names it. Which backend call serves it
/// depends on the caller's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOperation {
    Students,
    ClassStudents,
    Classes,
    Departments,
    Degrees,
    Certificates,
    Wallets,
    Notifications,
}

impl ListOperation {
    /// Stable name used as the first part of every query key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::ClassStudents => "class_students",
            Self::Classes => "classes",
            Self::Departments => "departments",
            Self::Degrees => "degrees",
            Self::Certificates => "certificates",
            Self::Wallets => "wallets",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for ListOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Only the path of this URL is ever read.
const SCRATCH_BASE: &str = "http://backend.invalid/";

/// PageBase
///
/// How an endpoint numbers its pages. Callers always use zero-based
/// indices; the translation happens only at the backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBase {
    ZeroBased,
    OneBased,
}

impl PageBase {
    /// The page number the backend expects. `None` when a one-based index
    /// would not fit in a `u32`.
    pub fn to_backend(self, page_index: u32) -> Option<u32> {
        match self {
            Self::ZeroBased => Some(page_index),
            Self::OneBased => page_index.checked_add(1),
        }
    }

    pub fn from_backend(self, page: u32) -> u32 {
        match self {
            Self::ZeroBased => page,
            Self::OneBased => page.saturating_sub(1),
        }
    }
}

/// Endpoint
///
/// One concrete backend listing call. `{name}` segments in the path are
/// required scope parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    path_template: String,
    page_base: PageBase,
    personal: bool,
}

impl Endpoint {
    /// A one-based, non-personal endpoint.
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            page_base: PageBase::OneBased,
            personal: false,
        }
    }

    pub fn zero_based(mut self) -> Self {
        self.page_base = PageBase::ZeroBased;
        self
    }

    /// Marks results as specific to the calling account, so the actor id
    /// becomes part of the query key.
    pub fn personal(mut self) -> Self {
        self.personal = true;
        self
    }

    pub fn page_base(&self) -> PageBase {
        self.page_base
    }

    pub fn is_personal(&self) -> bool {
        self.personal
    }

    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.path_template
            .split('/')
            .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
    }

    /// Fills every placeholder from `scope`, percent-encoding each value as
    /// a single path segment. `None` when a required value is missing, empty
    /// or a dot segment.
    pub fn resolve(&self, scope: &BTreeMap<String, String>) -> Option<String> {
        let mut url = Url::parse(SCRATCH_BASE).ok()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.clear();
            for segment in self.path_template.split('/').filter(|s| !s.is_empty()) {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => {
                        let value = scope
                            .get(name)
                            .filter(|value| !matches!(value.as_str(), "" | "." | ".."))?;
                        segments.push(value);
                    }
                    None => {
                        segments.push(segment);
                    }
                }
            }
        }
        Some(url.path().to_string())
    }
}

/// DispatchTable
///
/// `(operation, role) → endpoint`. Supporting a new role is an added row,
/// not a new branch in the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    routes: HashMap<(ListOperation, Role), Endpoint>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, operation: ListOperation, role: Role, endpoint: Endpoint) -> Self {
        self.routes.insert((operation, role), endpoint);
        self
    }

    pub fn route_all(
        mut self,
        operation: ListOperation,
        roles: impl IntoIterator<Item = Role>,
        endpoint: Endpoint,
    ) -> Self {
        for role in roles {
            self.routes.insert((operation, role), endpoint.clone());
        }
        self
    }

    pub fn resolve(&self, operation: ListOperation, role: Role) -> Option<&Endpoint> {
        self.routes.get(&(operation, role))
    }

    /// Operations whose results for `role` depend on the calling account.
    pub fn personal_operations(&self, role: Role) -> impl Iterator<Item = ListOperation> + '_ {
        self.routes
            .iter()
            .filter(move |((_, routed), endpoint)| *routed == role && endpoint.is_personal())
            .map(|((operation, _), _)| *operation)
    }

    /// The listing calls of the administration console.
    pub fn console() -> Self {
        use ListOperation::*;
        use Role::{Admin, Khoa, Pdt, Student};

        Self::new()
            .route(Students, Admin, Endpoint::new("/admin/students"))
            .route(Students, Pdt, Endpoint::new("/pdt/students"))
            .route(Students, Khoa, Endpoint::new("/departments/{department_id}/students"))
            .route_all(ClassStudents, [Pdt, Khoa], Endpoint::new("/classes/{class_id}/students"))
            .route(Classes, Admin, Endpoint::new("/admin/classes"))
            .route(Classes, Pdt, Endpoint::new("/pdt/classes"))
            .route(Classes, Khoa, Endpoint::new("/departments/{department_id}/classes"))
            .route(Departments, Admin, Endpoint::new("/admin/departments"))
            .route(Departments, Pdt, Endpoint::new("/departments"))
            .route(Degrees, Admin, Endpoint::new("/admin/degrees"))
            .route(Degrees, Pdt, Endpoint::new("/pdt/degrees"))
            .route(Degrees, Khoa, Endpoint::new("/departments/{department_id}/degrees"))
            .route(Degrees, Student, Endpoint::new("/students/me/degrees").personal())
            .route(Certificates, Admin, Endpoint::new("/admin/certificates"))
            .route(Certificates, Pdt, Endpoint::new("/pdt/certificates"))
            .route(
                Certificates,
                Khoa,
                Endpoint::new("/departments/{department_id}/certificates"),
            )
            .route(
                Certificates,
                Student,
                Endpoint::new("/students/me/certificates").personal(),
            )
            .route(Wallets, Admin, Endpoint::new("/admin/wallets").zero_based())
            .route_all(Notifications, Role::ALL, Endpoint::new("/notifications").personal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_operation_resolves_per_role() {
        let table = DispatchTable::console();
        let admin = table.resolve(ListOperation::Classes, Role::Admin).unwrap();
        let khoa = table.resolve(ListOperation::Classes, Role::Khoa).unwrap();
        assert_eq!(admin.path_template(), "/admin/classes");
        assert_eq!(khoa.path_template(), "/departments/{department_id}/classes");
        assert!(table.resolve(ListOperation::Wallets, Role::Pdt).is_none());
    }

    #[test]
    fn student_listings_are_personal() {
        let table = DispatchTable::console();
        let mut personal: Vec<_> = table.personal_operations(Role::Student).collect();
        personal.sort_by_key(|operation| operation.name());
        assert_eq!(
            personal,
            vec![
                ListOperation::Certificates,
                ListOperation::Degrees,
                ListOperation::Notifications,
            ]
        );
    }

    #[test]
    fn resolve_fills_placeholders() {
        let endpoint = Endpoint::new("/classes/{class_id}/students");
        let scope = BTreeMap::from([("class_id".to_string(), "10A1".to_string())]);
        assert_eq!(endpoint.resolve(&scope).as_deref(), Some("/classes/10A1/students"));
        assert_eq!(endpoint.required_params().collect::<Vec<_>>(), vec!["class_id"]);
    }

    #[test]
    fn resolve_encodes_values_as_path_segments() {
        let endpoint = Endpoint::new("/classes/{class_id}/students");
        let scope = |value: &str| BTreeMap::from([("class_id".to_string(), value.to_string())]);

        assert_eq!(
            endpoint.resolve(&scope("10 A1")).as_deref(),
            Some("/classes/10%20A1/students")
        );
        assert_eq!(
            endpoint.resolve(&scope("10+A1")).as_deref(),
            Some("/classes/10+A1/students")
        );
        assert_eq!(
            endpoint.resolve(&scope("10A1/../admin")).as_deref(),
            Some("/classes/10A1%2F..%2Fadmin/students")
        );
    }

    #[test]
    fn resolve_requires_non_empty_scope_values() {
        let endpoint = Endpoint::new("/departments/{department_id}/students");
        assert_eq!(endpoint.resolve(&BTreeMap::new()), None);

        let empty = BTreeMap::from([("department_id".to_string(), String::new())]);
        assert_eq!(endpoint.resolve(&empty), None);

        let dots = BTreeMap::from([("department_id".to_string(), "..".to_string())]);
        assert_eq!(endpoint.resolve(&dots), None);
    }

    #[test]
    fn page_base_translation() {
        assert_eq!(PageBase::OneBased.to_backend(0), Some(1));
        assert_eq!(PageBase::OneBased.from_backend(1), 0);
        assert_eq!(PageBase::ZeroBased.to_backend(3), Some(3));
        assert_eq!(PageBase::OneBased.from_backend(0), 0);
    }

    #[test]
    fn last_index_does_not_wrap() {
        assert_eq!(PageBase::OneBased.to_backend(u32::MAX), None);
        assert_eq!(PageBase::OneBased.to_backend(u32::MAX - 1), Some(u32::MAX));
        assert_eq!(PageBase::ZeroBased.to_backend(u32::MAX), Some(u32::MAX));
    }
}
