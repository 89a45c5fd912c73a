use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use ts_rs::TS;
use utoipa::ToSchema;

use super::paginated::{ListRequest, Page, PaginatedDispatcher};
use crate::{
    error::QueryError,
    query::{QueryOutcome, QueryPolicy},
    role::Actor,
};

/// PageToken
///
/// One-based page number used as the cursor of infinite listings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(transparent)]
#[ts(export)]
pub struct PageToken(pub u32);

impl PageToken {
    pub const FIRST: PageToken = PageToken(1);

    /// Zero-based index of the page this token points at.
    pub fn index(self) -> u32 {
        self.0.saturating_sub(1)
    }

    /// The token after `current_page`, or `None` once the last page has been
    /// returned.
    pub fn next(current_page: u32, total_pages: u32) -> Option<PageToken> {
        (current_page < total_pages).then(|| PageToken(current_page + 1))
    }
}

impl Default for PageToken {
    fn default() -> Self {
        Self::FIRST
    }
}

/// InfinitePage
///
/// One page of an infinite listing plus the token to request after it.
#[derive(Debug, Clone, PartialEq, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct InfinitePage<T> {
    pub envelope: Page<T>,
    pub next_token: Option<PageToken>,
}

impl PaginatedDispatcher {
    /// list_page
    ///
    /// Fetches the page `token` points at. The next token is derived from the
    /// metadata the backend returned, not from the token that was sent.
    pub async fn list_page<T>(
        &self,
        actor: &Actor,
        request: &ListRequest,
        token: PageToken,
        policy: &QueryPolicy,
    ) -> Result<QueryOutcome<InfinitePage<T>>, QueryError>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let request = request.clone().page(token.index());
        let page = match self.list::<T>(actor, &request, policy).await? {
            QueryOutcome::Disabled => return Ok(QueryOutcome::Disabled),
            QueryOutcome::Ready(page) => page,
        };

        let next_token = PageToken::next(page.meta.current_page(), page.meta.total_pages);
        Ok(QueryOutcome::Ready(Arc::new(InfinitePage {
            envelope: Page::clone(&page),
            next_token,
        })))
    }
}

/// InfiniteQuery
///
/// Accumulates pages of one listing for a single actor. Fetching past the
/// last page is a no-op.
pub struct InfiniteQuery<T> {
    dispatcher: PaginatedDispatcher,
    actor: Actor,
    request: ListRequest,
    policy: QueryPolicy,
    pages: Vec<Arc<InfinitePage<T>>>,
}

impl<T> InfiniteQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        dispatcher: PaginatedDispatcher,
        actor: Actor,
        request: ListRequest,
        policy: QueryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            actor,
            request,
            policy,
            pages: Vec::new(),
        }
    }

    fn next_token(&self) -> Option<PageToken> {
        match self.pages.last() {
            None => Some(PageToken::FIRST),
            Some(page) => page.next_token,
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.next_token().is_some()
    }

    /// Loads the next page. Returns `false` without issuing a request when
    /// the listing is exhausted or the query is disabled.
    pub async fn fetch_next_page(&mut self) -> Result<bool, QueryError> {
        let Some(token) = self.next_token() else {
            return Ok(false);
        };

        match self
            .dispatcher
            .list_page::<T>(&self.actor, &self.request, token, &self.policy)
            .await?
        {
            QueryOutcome::Disabled => Ok(false),
            QueryOutcome::Ready(page) => {
                self.pages.push(page);
                Ok(true)
            }
        }
    }

    pub fn pages(&self) -> &[Arc<InfinitePage<T>>] {
        &self.pages
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.envelope.items.iter())
    }

    pub fn reset(&mut self) {
        self.pages.clear();
    }
}
