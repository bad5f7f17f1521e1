// TTL cache entry shared by gatherers and discoverers

use crate::data::{DeclaredTtl, TtlError};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Last fetched value of a source together with its expiration policy.
///
/// The value is only readable after a successful [`CachedEntry::update`].
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
    ttl: Duration,
    cached_at: Option<DateTime<Utc>>,
    value: Option<T>,
}

impl<T> CachedEntry<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached_at: None,
            value: None,
        }
    }

    /// Currently effective TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.cached_at
    }

    /// Value of the last successful fetch, if any
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// An entry that was never fetched is always expired. A clock that went
    /// backwards does not expire a fetched entry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.cached_at {
            None => true,
            Some(at) => match (now - at).to_std() {
                Ok(elapsed) => elapsed > self.ttl,
                Err(_) => false,
            },
        }
    }
}

impl<T: DeclaredTtl> CachedEntry<T> {
    /// Store a freshly fetched value. A valid TTL declared by the value
    /// replaces the effective TTL from now on.
    pub fn update(&mut self, value: T, now: DateTime<Utc>) {
        match value.declared_ttl() {
            Ok(ttl) => {
                if ttl != self.ttl {
                    tracing::info!(
                        previous = ?self.ttl,
                        ttl = ?ttl,
                        "Applying TTL declared by fetched payload"
                    );
                }
                self.ttl = ttl;
            }
            Err(TtlError::NotDeclared) => {}
            Err(e) => {
                tracing::warn!(ttl = ?self.ttl, "Ignoring payload TTL: {}", e);
            }
        }
        self.value = Some(value);
        self.cached_at = Some(now);
    }
}
