// Cached value sources and the per-instance lock that serializes their refresh

use super::cache::CachedEntry;
use crate::data::{DeclaredTtl, Discovery, Value};
use crate::error::{DatabindError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Source of the current time, injected so expiry is deterministic under test
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Fetch function of a gatherer
pub type GatherFn = Box<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

/// Fetch function of a discoverer
pub type DiscoverFn = Box<dyn Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync>;

/// Clock reading the system time
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Pairs a fetch function with the cache entry that gates it
struct CachedSource<T, F> {
    cache: CachedEntry<T>,
    fetch: F,
}

impl<T, F> CachedSource<T, F>
where
    T: DeclaredTtl + Clone,
    F: Fn() -> anyhow::Result<T>,
{
    /// Return the cached value while it is fresh, otherwise fetch and cache a
    /// new one. A failed fetch leaves the cache untouched.
    fn fetch_if_expired(&mut self, name: &str, now: DateTime<Utc>) -> Result<T> {
        if !self.cache.is_expired(now) {
            if let Some(value) = self.cache.value() {
                tracing::debug!(source = name, "Serving cached value");
                return Ok(value.clone());
            }
        }

        tracing::debug!(source = name, ttl = ?self.cache.ttl(), "Fetching expired source");
        let value = (self.fetch)().map_err(|e| DatabindError::FetchFailed {
            source_name: name.to_string(),
            source: e,
        })?;
        self.cache.update(value.clone(), now);
        Ok(value)
    }
}

/// A named source producing a single value
pub struct Gatherer {
    inner: CachedSource<Value, GatherFn>,
}

impl Gatherer {
    pub fn new<F>(ttl: Duration, fetch: F) -> Self
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            inner: CachedSource {
                cache: CachedEntry::new(ttl),
                fetch: Box::new(fetch),
            },
        }
    }

    pub fn fetch_if_expired(&mut self, name: &str, now: DateTime<Utc>) -> Result<Value> {
        self.inner.fetch_if_expired(name, now)
    }

    pub fn cache(&self) -> &CachedEntry<Value> {
        &self.inner.cache
    }
}

/// The source producing zero or more discovered entities
pub struct Discoverer {
    inner: CachedSource<Vec<Discovery>, DiscoverFn>,
}

impl Discoverer {
    pub fn new<F>(ttl: Duration, fetch: F) -> Self
    where
        F: Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync + 'static,
    {
        Self {
            inner: CachedSource {
                cache: CachedEntry::new(ttl),
                fetch: Box::new(fetch),
            },
        }
    }

    pub fn fetch_if_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<Discovery>> {
        self.inner.fetch_if_expired("discovery", now)
    }

    pub fn cache(&self) -> &CachedEntry<Vec<Discovery>> {
        &self.inner.cache
    }
}

/// Cache state guarded by the [`Sources`] lock
pub(crate) struct SourceState {
    pub(crate) discoverer: Option<Discoverer>,
    pub(crate) variables: BTreeMap<String, Gatherer>,
}

/// All data sources of one binder configuration.
///
/// Fetching takes the instance lock for the whole check-refetch-update
/// sequence, so concurrent callers never refresh the same source twice in
/// one expiry window.
pub struct Sources {
    state: Mutex<SourceState>,
    clock: Clock,
    span: tracing::Span,
}

impl Sources {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState {
                discoverer: None,
                variables: BTreeMap::new(),
            }),
            clock: system_clock(),
            span: tracing::info_span!("databind"),
        }
    }

    /// Replace the clock used to decide expiry
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the span engine log events are emitted in
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_discoverer(self, discoverer: Discoverer) -> Self {
        self.lock().discoverer = Some(discoverer);
        self
    }

    pub fn with_variable(self, name: impl Into<String>, gatherer: Gatherer) -> Self {
        self.lock().variables.insert(name.into(), gatherer);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn has_discoverer(&self) -> bool {
        self.lock().discoverer.is_some()
    }

    /// Names of the configured variables, sorted
    pub fn variable_names(&self) -> Vec<String> {
        self.lock().variables.keys().cloned().collect()
    }

    /// Effective TTL of a variable, including any payload override
    pub fn variable_ttl(&self, name: &str) -> Option<Duration> {
        self.lock().variables.get(name).map(|g| g.cache().ttl())
    }

    /// Effective TTL of the discoverer, including any payload override
    pub fn discovery_ttl(&self) -> Option<Duration> {
        self.lock().discoverer.as_ref().map(|d| d.cache().ttl())
    }

    /// Exclusive access to the cache state.
    ///
    /// Every mutation finishes before the guard drops, so a panic inside a
    /// fetch function cannot leave an entry half-updated and the poisoned
    /// state is safe to reuse.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Sources {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Sources")
            .field("discoverer", &state.discoverer.is_some())
            .field("variables", &state.variables.keys().collect::<Vec<_>>())
            .finish()
    }
}
