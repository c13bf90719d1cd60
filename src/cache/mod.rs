//! Run-scoped entity cache
//!
//! Read-mostly listings (campaigns, ad groups) are fetched once per
//! `(scope, entity type)` and served from memory until a write invalidates
//! them. There is no TTL: entries only go away through [`EntityCache::invalidate`].
//!
//! Concurrent misses on the same key are coalesced behind a per-key lock so
//! only one fetch goes out. A generation counter per key keeps a fetch that
//! raced with an invalidation from storing data that predates the write.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::metrics::record_cache_lookup;
use crate::{EntityType, Scope};

type CacheKey = (Scope, EntityType);

struct CacheEntry {
    values: Arc<dyn Any + Send + Sync>,
    len: usize,
    fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<CacheEntry>,
    fetch_lock: Arc<tokio::sync::Mutex<()>>,
}

/// In-memory cache of entity listings keyed by account scope and entity type.
#[derive(Default)]
pub struct EntityCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl EntityCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached listing, or run `fetch` and store its result.
    ///
    /// A second call for the same key without an invalidation in between
    /// never calls `fetch`. Fetch errors are returned and nothing is stored.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        fetch: F,
    ) -> Result<Arc<Vec<T>>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let key = (scope.clone(), entity_type);
        if let Some(hit) = self.lookup::<T>(&key) {
            return Ok(hit);
        }

        let fetch_lock = self.fetch_lock(&key);
        let _guard = fetch_lock.lock().await;

        // Another caller may have filled the slot while we waited.
        if let Some(hit) = self.lookup::<T>(&key) {
            return Ok(hit);
        }

        record_cache_lookup(entity_type.as_str(), false);
        debug!(scope = %scope, entity_type = %entity_type, "Entity cache miss");
        self.fetch_and_store(key, fetch).await
    }

    /// Bypass the cache: always run `fetch`, then replace the stored listing.
    pub async fn fetch_fresh<T, E, F, Fut>(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        fetch: F,
    ) -> Result<Arc<Vec<T>>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let key = (scope.clone(), entity_type);
        let fetch_lock = self.fetch_lock(&key);
        let _guard = fetch_lock.lock().await;
        debug!(scope = %scope, entity_type = %entity_type, "Entity cache bypassed");
        self.fetch_and_store(key, fetch).await
    }

    /// Drop the entry for a key. Returns whether an entry existed.
    ///
    /// Invalidating an absent key is a no-op.
    pub fn invalidate(&self, scope: &Scope, entity_type: EntityType) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(&(scope.clone(), entity_type)) {
            Some(slot) => {
                slot.generation += 1;
                let existed = slot.entry.take().is_some();
                if existed {
                    debug!(scope = %scope, entity_type = %entity_type, "Entity cache invalidated");
                }
                existed
            }
            None => false,
        }
    }

    /// Drop every entry for a scope.
    pub fn invalidate_scope(&self, scope: &Scope) {
        let mut slots = self.slots();
        for ((slot_scope, _), slot) in slots.iter_mut() {
            if slot_scope == scope {
                slot.generation += 1;
                slot.entry = None;
            }
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut slots = self.slots();
        for slot in slots.values_mut() {
            slot.generation += 1;
            slot.entry = None;
        }
    }

    /// Whether a listing is cached for the key.
    pub fn contains(&self, scope: &Scope, entity_type: EntityType) -> bool {
        self.slots()
            .get(&(scope.clone(), entity_type))
            .is_some_and(|slot| slot.entry.is_some())
    }

    /// When the cached listing for the key was fetched.
    pub fn fetched_at(&self, scope: &Scope, entity_type: EntityType) -> Option<DateTime<Utc>> {
        self.slots()
            .get(&(scope.clone(), entity_type))
            .and_then(|slot| slot.entry.as_ref().map(|e| e.fetched_at))
    }

    /// Number of cached listings.
    pub fn len(&self) -> usize {
        self.slots().values().filter(|s| s.entry.is_some()).count()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<Arc<Vec<T>>> {
        let slots = self.slots();
        let entry = slots.get(key)?.entry.as_ref()?;
        match entry.values.clone().downcast::<Vec<T>>() {
            Ok(values) => {
                record_cache_lookup(key.1.as_str(), true);
                debug!(
                    scope = %key.0,
                    entity_type = %key.1,
                    items = entry.len,
                    "Entity cache hit"
                );
                Some(values)
            }
            // Stored under a different element type: treat as a miss.
            Err(_) => None,
        }
    }

    fn fetch_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        self.slots()
            .entry(key.clone())
            .or_default()
            .fetch_lock
            .clone()
    }

    async fn fetch_and_store<T, E, F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Arc<Vec<T>>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let generation = self
            .slots()
            .get(&key)
            .map(|slot| slot.generation)
            .unwrap_or_default();

        let values = Arc::new(fetch().await?);

        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_default();
        if slot.generation == generation {
            slot.entry = Some(CacheEntry {
                values: values.clone(),
                len: values.len(),
                fetched_at: Utc::now(),
            });
            debug!(scope = %key.0, entity_type = %key.1, items = values.len(), "Entity cache filled");
        } else {
            debug!(
                scope = %key.0,
                entity_type = %key.1,
                "Entity cache invalidated during fetch, result not stored"
            );
        }
        Ok(values)
    }
}
