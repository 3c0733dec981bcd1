//! TTL memoization in front of expensive reads.
//!
//! Entries are kept after they expire: a fresh read that fails can still be
//! answered from the last value (see [`TtlCache::get_stale`]). Access is
//! synchronous and never suspends.
//!
//! Every invalidation bumps a generation counter. A value fetched before an
//! invalidation is refused by [`TtlCache::set_if_current`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;

/// Key for the full card collection.
pub const COLLECTION_KEY: &str = "cards:all";
/// Key for the aggregate statistics.
pub const STATS_KEY: &str = "stats:summary";

/// Build a cache key from an operation name and its parameters.
pub fn cache_key(operation: &str, params: &[&str]) -> String {
    if params.is_empty() {
        operation.to_string()
    } else {
        format!("{operation}:{}", params.join(":"))
    }
}

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// A cached value and whether it is still within its TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub fresh: bool,
    pub stored_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    generation: u64,
}

pub struct TtlCache {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    /// Current invalidation generation. Read it before fetching a value that
    /// will be stored with [`set_if_current`](Self::set_if_current).
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Fresh value for `key`, if present, unexpired and of type `T`.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.get_stale::<T>(key)
            .filter(|c| c.fresh)
            .map(|c| c.value)
    }

    /// Value for `key` regardless of expiry.
    pub fn get_stale<T: Clone + 'static>(&self, key: &str) -> Option<Cached<T>> {
        let now = self.clock.now();
        let state = self.state.lock();
        let entry = state.entries.get(key)?;
        let value = entry.value.downcast_ref::<T>()?.clone();
        Some(Cached {
            value,
            fresh: now < entry.expires_at,
            stored_at: entry.stored_at,
        })
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let entry = self.entry(value, ttl);
        self.state.lock().entries.insert(key.into(), entry);
    }

    /// Store `value` only if nothing was invalidated since `generation` was
    /// read. Returns whether the value was stored.
    pub fn set_if_current<T: Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        value: T,
        ttl: Duration,
        generation: u64,
    ) -> bool {
        let entry = self.entry(value, ttl);
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.entries.insert(key.into(), entry);
        true
    }

    /// Expire `key` immediately. The value stays available to [`get_stale`](Self::get_stale).
    pub fn invalidate(&self, key: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.expires_at = entry.expires_at.min(now);
        }
    }

    /// Expire every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.generation += 1;
        for (_, entry) in state
            .entries
            .iter_mut()
            .filter(|(k, _)| k.starts_with(prefix))
        {
            entry.expires_at = entry.expires_at.min(now);
        }
    }

    /// Drop everything, including stale fallbacks.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    fn entry<T: Send + Sync + 'static>(&self, value: T, ttl: Duration) -> Entry {
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(now);
        Entry {
            value: Box::new(value),
            stored_at: now,
            expires_at,
        }
    }
}
