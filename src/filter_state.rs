//! Two-way binding between a filter value and one URL query parameter.
//!
//! The URL is the source of truth. A [`SyncedValue`] is a debounced mirror:
//! local edits are visible immediately and reach the URL after a quiet
//! period, while URL changes made elsewhere (back/forward, navigation)
//! overwrite the local value.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use url::Url;

struct History {
    entries: Vec<Url>,
    cursor: usize,
}

impl History {
    fn current(&self) -> &Url {
        &self.entries[self.cursor]
    }
}

struct LocationInner {
    history: Mutex<History>,
    changes: watch::Sender<Url>,
    writes: AtomicUsize,
}

/// Location
///
/// In-process model of the browser location: a current URL with
/// back/forward history. Cloning yields another handle to the same location.
#[derive(Clone)]
pub struct Location {
    inner: Arc<LocationInner>,
}

impl Location {
    pub fn new(url: Url) -> Self {
        let (changes, _) = watch::channel(url.clone());
        Self {
            inner: Arc::new(LocationInner {
                history: Mutex::new(History {
                    entries: vec![url],
                    cursor: 0,
                }),
                changes,
                writes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Url::parse(url).map(Self::new)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.inner.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, url: Url) {
        self.inner.changes.send_replace(url);
    }

    pub fn current(&self) -> Url {
        self.history().current().clone()
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        query_value(self.history().current(), name)
    }

    /// Sets (`Some`) or removes (`None`) a query parameter on the current
    /// entry without adding a history entry.
    pub fn replace_query_param(&self, name: &str, value: Option<&str>) {
        let url = {
            let mut history = self.history();
            let cursor = history.cursor;
            let url = with_query_param(&history.entries[cursor], name, value);
            history.entries[cursor] = url.clone();
            url
        };
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(param = name, url = %url, "location replaced");
        self.publish(url);
    }

    /// Pushes `target`, resolved against the current URL. Forward history is
    /// discarded.
    pub fn navigate(&self, target: &str) -> Result<(), url::ParseError> {
        let url = {
            let mut history = self.history();
            let url = history.current().join(target)?;
            let next = history.cursor + 1;
            history.entries.truncate(next);
            history.entries.push(url.clone());
            history.cursor = next;
            url
        };
        self.publish(url);
        Ok(())
    }

    pub fn back(&self) -> bool {
        self.step(|cursor, _| cursor.checked_sub(1))
    }

    pub fn forward(&self) -> bool {
        self.step(|cursor, len| (cursor + 1 < len).then_some(cursor + 1))
    }

    fn step(&self, target: impl FnOnce(usize, usize) -> Option<usize>) -> bool {
        let url = {
            let mut history = self.history();
            let Some(cursor) = target(history.cursor, history.entries.len()) else {
                return false;
            };
            history.cursor = cursor;
            history.current().clone()
        };
        self.publish(url);
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<Url> {
        self.inner.changes.subscribe()
    }

    /// Number of in-place query parameter writes so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn with_query_param(url: &Url, name: &str, value: Option<&str>) -> Url {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut placed = false;
    for (key, existing) in url.query_pairs() {
        if key != name {
            pairs.push((key.into_owned(), existing.into_owned()));
        } else if let (Some(value), false) = (value, placed) {
            pairs.push((key.into_owned(), value.to_string()));
            placed = true;
        }
    }
    if let (Some(value), false) = (value, placed) {
        pairs.push((name.to_string(), value.to_string()));
    }

    let mut url = url.clone();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}

struct SyncState {
    value: String,
    /// The parameter value as last seen in, or written to, the URL.
    last_synced: String,
    pending: Option<JoinHandle<()>>,
    /// Bumped whenever a scheduled write is superseded. A write task only
    /// acts if the generation it was spawned with is still current.
    generation: u64,
}

struct Binding {
    location: Location,
    param: String,
    debounce: Duration,
    state: Mutex<SyncState>,
}

impl Binding {
    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, generation: u64) {
        let value = {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.pending = None;
            if state.value == state.last_synced {
                return;
            }
            state.last_synced = state.value.clone();
            state.value.clone()
        };

        tracing::debug!(param = %self.param, value = %value, "filter written to location");
        let value = (!value.is_empty()).then_some(value.as_str());
        self.location.replace_query_param(&self.param, value);
    }

    fn reflect(&self, url: &Url) {
        let external = query_value(url, &self.param).unwrap_or_default();
        let mut state = self.state();
        if external == state.last_synced {
            return;
        }
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;
        state.last_synced = external.clone();
        state.value = external;
    }
}

/// SyncedValue
///
/// A string filter bound to one query parameter. Must be created inside a
/// Tokio runtime; dropping it cancels any pending write.
pub struct SyncedValue {
    binding: Arc<Binding>,
    watcher: JoinHandle<()>,
}

impl SyncedValue {
    pub fn bind(location: &Location, param: impl Into<String>, debounce: Duration) -> Self {
        let param = param.into();
        let initial = location.query_param(&param).unwrap_or_default();
        let binding = Arc::new(Binding {
            location: location.clone(),
            param,
            debounce,
            state: Mutex::new(SyncState {
                value: initial.clone(),
                last_synced: initial,
                pending: None,
                generation: 0,
            }),
        });

        let mut changes = location.subscribe();
        let watched = binding.clone();
        let watcher = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let url = changes.borrow_and_update().clone();
                watched.reflect(&url);
            }
        });

        Self { binding, watcher }
    }

    pub fn param(&self) -> &str {
        &self.binding.param
    }

    pub fn value(&self) -> String {
        self.binding.state().value.clone()
    }

    /// Updates the local value now and schedules the URL write for after the
    /// debounce window. Each call restarts the window.
    pub fn set(&self, value: impl Into<String>) {
        let mut state = self.binding.state();
        state.value = value.into();
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;

        let binding = self.binding.clone();
        let generation = state.generation;
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(binding.debounce).await;
            binding.flush(generation);
        }));
    }
}

impl Drop for SyncedValue {
    fn drop(&mut self) {
        self.watcher.abort();
        let mut state = self.binding.state();
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }
}
