//! Cache handle registry
//!
//! Maps plan cache names to mountable cache handles for one compilation. The
//! underlying volumes persist in the backend; the store only guarantees that
//! every reference to the same name within a build lands on the same handle.
//! An optional unique id namespaces the keys so independent builds sharing a
//! backend do not collide — or deliberately share, by using the same id.

use crate::plan::{Cache, CacheType};
use crate::state::{CacheSharing, ExecState};
use std::collections::HashMap;

/// A mountable cache handle, memoized per effective key
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: String,
    state: ExecState,
    sharing: CacheSharing,
}

impl CacheEntry {
    /// Effective (possibly namespaced) cache key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The empty state the cache volume is seeded from
    pub fn state(&self) -> &ExecState {
        &self.state
    }

    pub fn sharing(&self) -> CacheSharing {
        self.sharing
    }
}

/// Registry of cache handles, injected into each compilation
#[derive(Debug, Default)]
pub struct CacheStore {
    unique_id: Option<String>,
    entries: HashMap<String, CacheEntry>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose keys are namespaced as `"{unique_id}-{key}"`
    pub fn with_unique_id(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: Some(unique_id.into()),
            entries: HashMap::new(),
        }
    }

    /// Look up or create the handle for a cache name. The first call for a
    /// key creates the entry; later calls return it unchanged, whatever
    /// `cache` says then.
    pub fn get_cache(&mut self, key: &str, cache: &Cache) -> CacheEntry {
        let cache_key = match &self.unique_id {
            Some(id) => format!("{id}-{key}"),
            None => key.to_string(),
        };

        self.entries
            .entry(cache_key.clone())
            .or_insert_with(|| CacheEntry {
                key: cache_key,
                state: ExecState::scratch(),
                sharing: sharing_mode(cache.r#type),
            })
            .clone()
    }
}

/// Concurrency mode for a cache type
fn sharing_mode(cache_type: CacheType) -> CacheSharing {
    match cache_type {
        CacheType::Shared => CacheSharing::Shared,
        CacheType::Locked => CacheSharing::Locked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookup_returns_same_handle() {
        let mut store = CacheStore::new();
        let cache = Cache::new("/root/.npm");

        let first = store.get_cache("npm", &cache);
        let second = store.get_cache("npm", &cache);

        assert_eq!(first.key(), second.key());
        assert!(first.state().same_op(second.state()));
    }

    #[test]
    fn first_creation_wins_over_later_metadata() {
        let mut store = CacheStore::new();

        let first = store.get_cache("npm", &Cache::new("/root/.npm"));
        let second = store.get_cache("npm", &Cache::locked("/elsewhere"));

        assert_eq!(first.sharing(), CacheSharing::Shared);
        assert_eq!(second.sharing(), CacheSharing::Shared);
        assert!(first.state().same_op(second.state()));
    }

    #[test]
    fn unique_id_namespaces_keys() {
        let cache = Cache::new("/root/.npm");

        let mut store = CacheStore::with_unique_id("svc-a");
        assert_eq!(store.get_cache("npm", &cache).key(), "svc-a-npm");

        let mut plain = CacheStore::new();
        assert_eq!(plain.get_cache("npm", &cache).key(), "npm");
    }

    #[test]
    fn distinct_keys_get_distinct_handles() {
        let mut store = CacheStore::new();
        let npm = store.get_cache("npm", &Cache::new("/root/.npm"));
        let go = store.get_cache("go", &Cache::new("/root/.cache/go-build"));
        assert!(!npm.state().same_op(go.state()));
    }

    #[test]
    fn sharing_follows_cache_type() {
        let mut store = CacheStore::new();
        let shared = store.get_cache("a", &Cache::new("/a"));
        let locked = store.get_cache("b", &Cache::locked("/b"));

        assert_eq!(shared.sharing(), CacheSharing::Shared);
        assert_eq!(locked.sharing(), CacheSharing::Locked);
    }
}
