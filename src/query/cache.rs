use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use super::key::QueryKey;
use crate::error::QueryError;

/// Type-erased value held by the cache.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue, QueryError>>>;

enum Slot {
    // A request is on the wire; later callers attach to it.
    Pending { fetch: SharedFetch, generation: u64 },
    Ready { value: CachedValue, stored_at: Instant },
}

/// QueryPolicy
///
/// Per-call caching behaviour. The default keeps results for the whole
/// session, never refetches in the background and does not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPolicy {
    /// A disabled query is never issued.
    pub enabled: bool,
    /// Age after which a cached result is refetched. `None` never expires.
    pub stale_after: Option<Duration>,
    /// Extra attempts after a failed fetch.
    pub retries: u32,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after: None,
            retries: 0,
        }
    }
}

impl QueryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn is_fresh(&self, stored_at: Instant) -> bool {
        match self.stale_after {
            None => true,
            Some(window) => stored_at.elapsed() < window,
        }
    }
}

/// QueryOutcome
///
/// Result of a query that did not fail. `Disabled` is the silent no-op for
/// a query whose discriminating parameters are not available yet.
#[derive(Debug)]
pub enum QueryOutcome<T> {
    Disabled,
    Ready(Arc<T>),
}

impl<T> QueryOutcome<T> {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    pub fn into_option(self) -> Option<Arc<T>> {
        match self {
            Self::Disabled => None,
            Self::Ready(value) => Some(value),
        }
    }
}

enum Lookup {
    Hit(CachedValue),
    Await(SharedFetch, u64),
}

/// QueryCache
///
/// Process-wide key → result table shared by every dispatcher.
///
/// At most one request per key is in flight: a second caller for a pending
/// key awaits the same shared future. Whichever waiter observes completion
/// first settles the slot, so a caller that drops its future only gives up
/// its own interest.
#[derive(Default)]
pub struct QueryCache {
    slots: Mutex<HashMap<QueryKey, Slot>>,
    generation: AtomicU64,
}

pub type CacheState = Arc<QueryCache>;

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// fetch
    ///
    /// Returns the cached value for `key` when it is fresh, attaches to an
    /// in-flight request for the same key, or issues `fetcher` (retrying up
    /// to `policy.retries` extra times). Failures are returned and never
    /// stored.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: QueryKey,
        policy: &QueryPolicy,
        fetcher: F,
    ) -> Result<QueryOutcome<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        if !policy.enabled {
            tracing::trace!(key = %key, "query disabled");
            return Ok(QueryOutcome::Disabled);
        }

        let lookup = {
            let mut slots = self.slots();
            let existing = match slots.get(&key) {
                Some(Slot::Ready { value, stored_at }) if policy.is_fresh(*stored_at) => {
                    Some(Lookup::Hit(value.clone()))
                }
                Some(Slot::Pending { fetch, generation }) => {
                    Some(Lookup::Await(fetch.clone(), *generation))
                }
                _ => None,
            };

            match existing {
                Some(Lookup::Hit(value)) => {
                    tracing::debug!(key = %key, "query cache hit");
                    Lookup::Hit(value)
                }
                Some(Lookup::Await(fetch, generation)) => {
                    tracing::debug!(key = %key, "query attached to in-flight request");
                    Lookup::Await(fetch, generation)
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = Self::issue(key.clone(), policy.retries, fetcher);
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            fetch: fetch.clone(),
                            generation,
                        },
                    );
                    tracing::debug!(key = %key, "query issued");
                    Lookup::Await(fetch, generation)
                }
            }
        };

        let value = match lookup {
            Lookup::Hit(value) => value,
            Lookup::Await(fetch, generation) => {
                let result = fetch.await;
                self.settle(&key, generation, &result);
                result?
            }
        };

        value
            .downcast::<T>()
            .map(QueryOutcome::Ready)
            .map_err(|_| QueryError::TypeMismatch {
                key: key.to_string(),
            })
    }

    fn issue<T, F, Fut>(key: QueryKey, retries: u32, fetcher: F) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        async move {
            let mut attempt = 0;
            loop {
                match fetcher().await {
                    Ok(value) => return Ok(Arc::new(value) as CachedValue),
                    Err(err) if attempt < retries => {
                        attempt += 1;
                        tracing::warn!(key = %key, attempt, error = %err, "query failed, retrying");
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "query failed");
                        return Err(err);
                    }
                }
            }
        }
        .boxed()
        .shared()
    }

    // Only the generation that created the pending slot may settle it; an
    // invalidated or replaced slot ignores late results.
    fn settle(&self, key: &QueryKey, generation: u64, result: &Result<CachedValue, QueryError>) {
        let mut slots = self.slots();
        let current = matches!(
            slots.get(key),
            Some(Slot::Pending { generation: pending, .. }) if *pending == generation
        );
        if !current {
            return;
        }

        match result {
            Ok(value) => {
                slots.insert(
                    key.clone(),
                    Slot::Ready {
                        value: value.clone(),
                        stored_at: Instant::now(),
                    },
                );
            }
            Err(_) => {
                slots.remove(key);
            }
        }
    }

    /// Removes every entry, settled or pending, whose key starts with
    /// `prefix`. Returns how many were dropped.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|key, _| !key.starts_with(prefix));
        let removed = before - slots.len();
        tracing::debug!(prefix = %prefix, removed, "query cache invalidated");
        removed
    }

    /// mutate
    ///
    /// Runs a mutation exactly once. The affected prefixes are invalidated
    /// only after it succeeds; a failure invalidates nothing and is returned
    /// to the caller.
    pub async fn mutate<T, Fut>(&self, mutation: Fut, affected: &[QueryKey]) -> Result<T, QueryError>
    where
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let value = mutation.await?;
        for prefix in affected {
            self.invalidate(prefix);
        }
        Ok(value)
    }

    /// Empties the table.
    pub fn clear(&self) {
        self.slots().clear();
    }

    /// True when a settled value is stored under `key`.
    pub fn contains(&self, key: &QueryKey) -> bool {
        matches!(self.slots().get(key), Some(Slot::Ready { .. }))
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;

    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
        value: u32,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32, QueryError>> + Send + Sync + 'static {
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    fn failure() -> QueryError {
        QueryError::Backend {
            status: 500,
            message: "unavailable".to_string(),
            raw: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_fetch_is_served_from_cache() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("degrees").with("ADMIN");

        let first = cache
            .fetch(key.clone(), &QueryPolicy::default(), counting_fetcher(calls.clone(), 7))
            .await
            .unwrap();
        let second = cache
            .fetch(key.clone(), &QueryPolicy::default(), counting_fetcher(calls.clone(), 8))
            .await
            .unwrap();

        assert_eq!(*first.into_option().unwrap(), 7);
        assert_eq!(*second.into_option().unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_share_one_request() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("students").with("PDT");
        let policy = QueryPolicy::default();

        let (a, b) = tokio::join!(
            cache.fetch(key.clone(), &policy, counting_fetcher(calls.clone(), 1)),
            cache.fetch(key.clone(), &policy, counting_fetcher(calls.clone(), 2)),
        );

        assert_eq!(*a.unwrap().into_option().unwrap(), 1);
        assert_eq!(*b.unwrap().into_option().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_query_never_calls_fetcher() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = cache
            .fetch(
                QueryKey::new("classes"),
                &QueryPolicy::disabled(),
                counting_fetcher(calls.clone(), 1),
            )
            .await
            .unwrap();

        assert!(outcome.is_disabled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_refetched() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("wallets");
        let policy = QueryPolicy::default().stale_after(Some(Duration::from_secs(30)));

        cache
            .fetch(key.clone(), &policy, counting_fetcher(calls.clone(), 1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let refreshed = cache
            .fetch(key.clone(), &policy, counting_fetcher(calls.clone(), 2))
            .await
            .unwrap();

        assert_eq!(*refreshed.into_option().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_retried_or_cached_by_default() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("certificates");

        let counter = calls.clone();
        let result = cache
            .fetch(key.clone(), &QueryPolicy::default(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(failure())
                }
            })
            .await;

        assert!(matches!(result, Err(QueryError::Backend { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&key));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn opt_in_retries_recover_transient_failures() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let outcome = cache
            .fetch(QueryKey::new("departments"), &QueryPolicy::default().retries(2), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(failure())
                    } else {
                        Ok(5u32)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(*outcome.into_option().unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalidate_removes_matching_prefix_only() {
        let cache = QueryCache::new();
        let policy = QueryPolicy::default();
        for key in [
            QueryKey::new("students").with("ADMIN"),
            QueryKey::new("students").with("PDT"),
            QueryKey::new("degrees").with("ADMIN"),
        ] {
            cache.fetch(key, &policy, || async { Ok(1u8) }).await.unwrap();
        }

        assert_eq!(cache.invalidate(&QueryKey::new("students")), 2);
        assert!(cache.contains(&QueryKey::new("degrees").with("ADMIN")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn invalidated_pending_request_is_not_stored() {
        let cache = Arc::new(QueryCache::new());
        let gate = Arc::new(Notify::new());
        let key = QueryKey::new("notifications");

        let waiter = {
            let cache = cache.clone();
            let gate = gate.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .fetch(key, &QueryPolicy::default(), move || {
                        let gate = gate.clone();
                        async move {
                            gate.notified().await;
                            Ok(3u32)
                        }
                    })
                    .await
            })
        };

        while cache.is_empty() {
            tokio::task::yield_now().await;
        }
        cache.invalidate(&QueryKey::new("notifications"));
        gate.notify_one();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(*outcome.into_option().unwrap(), 3);
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn mutation_invalidates_only_after_success() {
        let cache = QueryCache::new();
        let key = QueryKey::new("certificates").with("PDT");
        cache
            .fetch(key.clone(), &QueryPolicy::default(), || async { Ok(1u8) })
            .await
            .unwrap();

        let failed: Result<(), _> = cache
            .mutate(async { Err(failure()) }, &[QueryKey::new("certificates")])
            .await;
        assert!(failed.is_err());
        assert!(cache.contains(&key));

        let created = cache
            .mutate(async { Ok("created") }, &[QueryKey::new("certificates")])
            .await
            .unwrap();
        assert_eq!(created, "created");
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn reading_a_key_as_another_type_is_an_error() {
        let cache = QueryCache::new();
        let key = QueryKey::new("classes");
        cache
            .fetch(key.clone(), &QueryPolicy::default(), || async { Ok(1u8) })
            .await
            .unwrap();

        let result = cache
            .fetch(key, &QueryPolicy::default(), || async { Ok(String::new()) })
            .await;
        assert!(matches!(result, Err(QueryError::TypeMismatch { .. })));
    }
}
