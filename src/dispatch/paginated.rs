use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use ts_rs::TS;
use utoipa::ToSchema;

use super::table::{DispatchTable, ListOperation, PageBase};
use crate::{
    backend::{BackendPageRequest, BackendState, WirePage},
    error::QueryError,
    query::{CacheState, QueryKey, QueryOutcome, QueryPolicy},
    role::Actor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort
///
/// Single-column ordering. Textual form is `field` (ascending) or `-field`
/// (descending).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.strip_prefix('-') {
            Some(field) if !field.is_empty() => Some(Self::desc(field)),
            Some(_) => None,
            None if raw.is_empty() => None,
            None => Some(Self::asc(raw)),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{}", self.field),
            SortDirection::Desc => write!(f, "-{}", self.field),
        }
    }
}

/// ListRequest
///
/// Role-independent description of a listing. Page indices are zero-based.
/// `scope` carries the discriminating parameters (`department_id`,
/// `class_id`) that role-specific endpoints need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub operation: ListOperation,
    pub page_index: u32,
    pub page_size: u32,
    pub filters: BTreeMap<String, String>,
    pub sort: Option<Sort>,
    pub scope: BTreeMap<String, String>,
}

impl ListRequest {
    /// Highest zero-based index every endpoint can address.
    pub const MAX_PAGE_INDEX: u32 = u32::MAX - 1;

    pub fn new(operation: ListOperation) -> Self {
        Self {
            operation,
            page_index: 0,
            page_size: 10,
            filters: BTreeMap::new(),
            sort: None,
            scope: BTreeMap::new(),
        }
    }

    pub fn page(mut self, page_index: u32) -> Self {
        self.page_index = page_index;
        self
    }

    pub fn size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Adds a filter. Empty values mean "no filter" and are dropped.
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.filters.insert(name.into(), value);
        }
        self
    }

    pub fn sort(mut self, sort: Option<Sort>) -> Self {
        self.sort = sort;
        self
    }

    pub fn scope(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.scope.insert(name.into(), value.into());
        self
    }
}

/// PageMeta
///
/// Normalized pagination metadata. `page_index` is zero-based whatever the
/// backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PageMeta {
    pub page_index: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub per_page: u32,
}

impl PageMeta {
    /// One-based page number.
    pub fn current_page(&self) -> u32 {
        self.page_index.saturating_add(1)
    }

    pub fn has_next(&self) -> bool {
        self.current_page() < self.total_pages
    }
}

/// Page
///
/// The result envelope every listing is normalized to, whichever endpoint
/// served it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl<T: DeserializeOwned> Page<T> {
    pub fn from_wire(wire: WirePage, base: PageBase) -> Result<Self, QueryError> {
        let items = wire
            .items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(QueryError::decode)?;

        Ok(Self {
            items,
            meta: PageMeta {
                page_index: base.from_backend(wire.meta.current_page),
                total_pages: wire.meta.total_pages,
                total_count: wire.meta.total,
                per_page: wire.meta.per_page,
            },
        })
    }
}

/// A listing that can be issued: its cache key, the concrete backend call,
/// and how that backend numbers pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub key: QueryKey,
    pub request: BackendPageRequest,
    pub base: PageBase,
}

/// PaginatedDispatcher
///
/// Resolves a logical listing into the backend call for the actor's role and
/// runs it through the shared query cache.
#[derive(Clone)]
pub struct PaginatedDispatcher {
    backend: BackendState,
    cache: CacheState,
    table: Arc<DispatchTable>,
}

impl PaginatedDispatcher {
    pub fn new(backend: BackendState, cache: CacheState, table: DispatchTable) -> Self {
        Self {
            backend,
            cache,
            table: Arc::new(table),
        }
    }

    pub fn cache(&self) -> &CacheState {
        &self.cache
    }

    /// plan
    ///
    /// `None` when the query must stay disabled: no role yet, no endpoint for
    /// that role, a missing scope value, a personal endpoint without an
    /// actor id, or a page index the endpoint cannot address.
    pub fn plan(&self, actor: &Actor, request: &ListRequest) -> Option<Plan> {
        let role = actor.role?;
        let endpoint = self.table.resolve(request.operation, role)?;

        let mut scope = request.scope.clone();
        if let Some(department_id) = &actor.department_id {
            // A department-scoped actor never lists another department.
            scope.insert("department_id".to_string(), department_id.clone());
        }
        let path = endpoint.resolve(&scope)?;
        let base = endpoint.page_base();
        let backend_page = base.to_backend(request.page_index)?;

        let mut key = QueryKey::new(request.operation.name()).with(role);
        if endpoint.is_personal() {
            key = key.param("actor", actor.id?);
        }
        for name in endpoint.required_params() {
            key = key.param(name, &scope[name]);
        }
        key = key
            .param("page", request.page_index)
            .param("size", request.page_size);

        let mut query = vec![
            ("page".to_string(), backend_page.to_string()),
            ("limit".to_string(), request.page_size.to_string()),
        ];

        for (name, value) in request.filters.iter().filter(|(_, value)| !value.is_empty()) {
            key = key.param(&format!("filter.{name}"), value);
            query.push((name.clone(), value.clone()));
        }

        if let Some(sort) = &request.sort {
            key = key.param("sort", sort);
            query.push(("sort".to_string(), sort.field.clone()));
            let order = match sort.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            query.push(("order".to_string(), order.to_string()));
        }

        Some(Plan {
            key,
            request: BackendPageRequest {
                path,
                query,
                bearer: actor.token.clone(),
            },
            base,
        })
    }

    /// Drops every cached personal listing of `actor`. Returns the number of
    /// entries removed.
    pub fn forget(&self, actor: &Actor) -> usize {
        let (Some(role), Some(id)) = (actor.role, actor.id) else {
            return 0;
        };
        self.table
            .personal_operations(role)
            .map(|operation| {
                let prefix = QueryKey::new(operation.name()).with(role).param("actor", id);
                self.cache.invalidate(&prefix)
            })
            .sum()
    }

    /// list
    ///
    /// Fetches one page for the actor. Disabled plans and disabled policies
    /// return `QueryOutcome::Disabled` without touching the backend.
    pub async fn list<T>(
        &self,
        actor: &Actor,
        request: &ListRequest,
        policy: &QueryPolicy,
    ) -> Result<QueryOutcome<Page<T>>, QueryError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let Some(plan) = self.plan(actor, request) else {
            tracing::debug!(
                operation = %request.operation,
                role = ?actor.role,
                "list query disabled"
            );
            return Ok(QueryOutcome::Disabled);
        };

        let backend = self.backend.clone();
        let Plan { key, request, base } = plan;
        self.cache
            .fetch(key, policy, move || {
                let backend = backend.clone();
                let request = request.clone();
                async move {
                    let wire = backend.fetch_page(request).await?;
                    Page::<T>::from_wire(wire, base)
                }
            })
            .await
    }
}
