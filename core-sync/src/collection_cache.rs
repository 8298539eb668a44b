//! # Collection Cache
//!
//! Maps normalized path segments to remote collections so every distinct
//! path prefix costs at most one remote lookup-or-create per run.
//!
//! ## Layers
//!
//! - Run entries: in memory, dropped by [`CollectionCache::begin_run`]
//! - An optional [`CollectionStore`] that outlives runs. Reads fall through to
//!   it on a run miss and every resolved collection is written back. Entries
//!   are partitioned by a run *scope* (storage, root collection and mapping
//!   root) so trees of different storages never mix.
//!
//! ## Concurrency
//!
//! A miss takes the per-prefix lock, re-reads both layers and only then calls
//! the creation callback, so two workers racing on the same missing ancestor
//! produce a single remote create; the second one observes the first one's
//! result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::path::PathSegments;
use crate::{Result, SyncError};

/// A remote collection bound to a path prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub remote_id: String,
    pub segments: PathSegments,
    /// `None` for top-level collections without a configured root collection
    pub parent_id: Option<String>,
}

/// Collection mappings kept across runs, partitioned by scope
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn get(&self, scope: &str, segments: &PathSegments) -> Result<Option<CollectionRef>>;

    async fn put(&self, scope: &str, collection: &CollectionRef) -> Result<()>;

    /// Drop every entry of `scope`
    async fn clear(&self, scope: &str) -> Result<()>;

    async fn len(&self, scope: &str) -> Result<usize>;
}

/// Process-lifetime store, shared by coordinators of one process
#[derive(Default)]
pub struct InMemoryCollectionStore {
    entries: RwLock<HashMap<(String, PathSegments), CollectionRef>>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn get(&self, scope: &str, segments: &PathSegments) -> Result<Option<CollectionRef>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(scope.to_string(), segments.clone()))
            .cloned())
    }

    async fn put(&self, scope: &str, collection: &CollectionRef) -> Result<()> {
        self.entries.write().await.insert(
            (scope.to_string(), collection.segments.clone()),
            collection.clone(),
        );
        Ok(())
    }

    async fn clear(&self, scope: &str) -> Result<()> {
        self.entries.write().await.retain(|(s, _), _| s != scope);
        Ok(())
    }

    async fn len(&self, scope: &str) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|(s, _)| s == scope)
            .count())
    }
}

/// Ancestor-first, single-flight cache of remote collections
#[derive(Default)]
pub struct CollectionCache {
    scope: RwLock<String>,
    entries: RwLock<HashMap<PathSegments, CollectionRef>>,
    store: Option<Arc<dyn CollectionStore>>,
    inflight: Mutex<HashMap<PathSegments, Arc<Mutex<()>>>>,
}

impl CollectionCache {
    /// Cache that reads through to and writes back to `store`
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Cache without a persistent layer; nothing survives [`begin_run`](Self::begin_run)
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Start a new run in `scope`: run entries and in-flight locks are
    /// dropped, the persistent store is kept.
    pub async fn begin_run(&self, scope: &str) {
        let mut inflight = self.inflight.lock().await;
        inflight.clear();
        self.entries.write().await.clear();
        *self.scope.write().await = scope.to_string();
        debug!(scope, persistent = self.store.is_some(), "Collection cache run started");
    }

    /// Collection for exactly these segments, from either layer
    pub async fn get(&self, segments: &PathSegments) -> Result<Option<CollectionRef>> {
        if let Some(hit) = self.entries.read().await.get(segments) {
            return Ok(Some(hit.clone()));
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };
        let scope = self.scope.read().await.clone();
        let stored = store.get(&scope, segments).await?;
        if let Some(found) = &stored {
            trace!(segments = %segments, "Collection restored from persistent store");
            self.entries
                .write()
                .await
                .insert(segments.clone(), found.clone());
        }
        Ok(stored)
    }

    /// Resolve every prefix of `segments`, shortest first, and return the leaf.
    ///
    /// `create_fn(prefix, parent)` is called only for prefixes missing from
    /// the cache; `parent` is the already-resolved collection one level up
    /// (`None` for a top-level prefix). An error from `create_fn` stops the
    /// walk: deeper prefixes are not attempted.
    ///
    /// # Errors
    ///
    /// `SyncError::InvalidPath` for empty segments, otherwise whatever
    /// `create_fn` or the store returns.
    pub async fn get_or_create<F, Fut>(
        &self,
        segments: &PathSegments,
        mut create_fn: F,
    ) -> Result<CollectionRef>
    where
        F: FnMut(PathSegments, Option<CollectionRef>) -> Fut,
        Fut: Future<Output = Result<CollectionRef>>,
    {
        let mut parent: Option<CollectionRef> = None;

        for prefix in segments.prefixes() {
            if let Some(hit) = self.get(&prefix).await? {
                trace!(segments = %prefix, "Collection cache hit");
                parent = Some(hit);
                continue;
            }

            let lock = self.prefix_lock(&prefix).await;
            let _guard = lock.lock().await;

            // Another worker may have resolved it while we waited
            if let Some(hit) = self.get(&prefix).await? {
                trace!(segments = %prefix, "Collection resolved by concurrent worker");
                parent = Some(hit);
                continue;
            }

            debug!(segments = %prefix, "Collection cache miss");
            let created = create_fn(prefix.clone(), parent.clone()).await?;
            self.put(&created).await?;
            parent = Some(created);
        }

        parent.ok_or_else(|| SyncError::InvalidPath {
            path: segments.to_string(),
            reason: "the mapping root has no collection of its own".to_string(),
        })
    }

    /// Forget the current scope in both layers
    pub async fn clear(&self) -> Result<()> {
        self.inflight.lock().await.clear();
        self.entries.write().await.clear();
        if let Some(store) = &self.store {
            let scope = self.scope.read().await.clone();
            store.clear(&scope).await?;
        }
        Ok(())
    }

    /// Collections resolved during the current run
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn put(&self, collection: &CollectionRef) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(collection.segments.clone(), collection.clone());
        if let Some(store) = &self.store {
            let scope = self.scope.read().await.clone();
            store.put(&scope, collection).await?;
        }
        Ok(())
    }

    async fn prefix_lock(&self, prefix: &PathSegments) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        Arc::clone(
            inflight
                .entry(prefix.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
