//! # Ingest Coordinator
//!
//! Entry points for the automation layer: directory mapping and file ingest.
//!
//! ## Overview
//!
//! The coordinator owns the collection cache, the resume log and the ingest
//! engine, and scopes them into *runs*. A run fixes the target storage, its
//! settings (fetched once, with retry) and the mapping root.
//! [`map_directory_structure`](IngestCoordinator::map_directory_structure)
//! always starts a fresh run, which drops the collections cached for the
//! previous run. Ingest calls reuse the current run for the same storage.
//!
//! With `collection_cache_path` configured, mapped collections are also kept
//! in SQLite, keyed by storage, mapping root and root collection, so later
//! runs over the same tree need no collection lookups.
//!
//! The mapping root is `root_path` from the configuration. Without one, the
//! directory given to `map_directory_structure` is the root, and ingest runs
//! started without mapping fall back to the storage mount point.
//!
//! Only configuration problems are raised as errors. Per-directory and
//! per-file failures are reported in the returned structures.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::IngestCoordinator;
//! use core_runtime::IngestConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = IngestConfig::builder().storage_id("fs-media").root_path("/data").build()?;
//! let coordinator = IngestCoordinator::new(config, dam_client).await?;
//!
//! let report = coordinator.map_directory_structure("/data", "fs-media").await?;
//! let outcome = coordinator.ingest_file("/data/2024/01/a.mov", "fs-media").await?;
//!
//! let cancel = CancellationToken::new();
//! let batch = coordinator.ingest_batch(&files, "fs-media", &cancel).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::{DamClient, StorageSettings};
use core_runtime::logging::log_path;
use core_runtime::IngestConfig;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collection_cache::{CollectionCache, CollectionStore};
use crate::filters::ScanFilter;
use crate::ingest::{IngestEngine, IngestOptions, IngestRun};
use crate::mapper::{DirectoryMapper, MappingReport, MappingRoot};
use crate::repository::{
    InMemoryResumeLog, ResumeEntry, ResumeLog, SqliteCollectionStore, SqliteResumeLog,
};
use crate::retry::RetryPolicy;
use crate::task::{IngestOutcome, IngestStatus};
use crate::{Result, SyncError};

/// One file of a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub path: PathBuf,
    /// `None` when the batch was cancelled before this file started
    pub outcome: Option<IngestOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One item per input path, in input order
    pub outcomes: Vec<BatchItem>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn count(&self, status: IngestStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|item| item.outcome.as_ref().map(|o| o.status) == Some(status))
            .count()
    }

    pub fn not_attempted(&self) -> usize {
        self.outcomes.iter().filter(|item| item.outcome.is_none()).count()
    }
}

pub struct IngestCoordinator {
    config: IngestConfig,
    client: Arc<dyn DamClient>,
    policy: RetryPolicy,
    cache: Arc<CollectionCache>,
    resume_log: Arc<dyn ResumeLog>,
    engine: IngestEngine,
    run: Mutex<Option<Arc<IngestRun>>>,
}

impl IngestCoordinator {
    /// Create a coordinator from configuration.
    ///
    /// The resume log is SQLite-backed when `resume_log_path` is configured,
    /// in-memory otherwise. Collections outlive a run only when
    /// `collection_cache_path` is configured.
    pub async fn new(config: IngestConfig, client: Arc<dyn DamClient>) -> Result<Self> {
        config.validate()?;

        let resume_log: Arc<dyn ResumeLog> = match &config.resume_log_path {
            Some(path) => Arc::new(SqliteResumeLog::open(path).await?),
            None => Arc::new(InMemoryResumeLog::new()),
        };

        let collection_store: Option<Arc<dyn CollectionStore>> =
            match &config.collection_cache_path {
                Some(path) => Some(Arc::new(SqliteCollectionStore::open(path).await?)),
                None => None,
            };

        Self::with_stores(config, client, resume_log, collection_store)
    }

    /// Create a coordinator over explicit state backends.
    ///
    /// `collection_store` keeps mapped collections across runs; `None` caches
    /// them for the current run only.
    pub fn with_stores(
        config: IngestConfig,
        client: Arc<dyn DamClient>,
        resume_log: Arc<dyn ResumeLog>,
        collection_store: Option<Arc<dyn CollectionStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let policy = RetryPolicy::from_config(&config);
        let engine = IngestEngine::new(
            Arc::clone(&client),
            policy.clone(),
            Arc::clone(&resume_log),
            config.dedup_enabled,
            config.metadata_view_id.clone(),
        );

        Ok(Self {
            cache: Arc::new(match collection_store {
                Some(store) => CollectionCache::new(store),
                None => CollectionCache::in_memory(),
            }),
            config,
            client,
            policy,
            resume_log,
            engine,
            run: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Files that registered an asset without linking it, or failed
    pub async fn pending_resumes(&self) -> Result<Vec<ResumeEntry>> {
        self.resume_log.pending().await
    }

    /// Mirror every directory under `root_path` as collections
    pub async fn map_directory_structure(
        &self,
        root_path: impl AsRef<Path>,
        storage_id: &str,
    ) -> Result<MappingReport> {
        self.map_directory_structure_cancellable(root_path, storage_id, &CancellationToken::new())
            .await
    }

    pub async fn map_directory_structure_cancellable(
        &self,
        root_path: impl AsRef<Path>,
        storage_id: &str,
        cancel: &CancellationToken,
    ) -> Result<MappingReport> {
        let root_path = root_path.as_ref();
        let walk_root = root_path.to_string_lossy();
        let run = self.start_run(storage_id, Some(walk_root.as_ref())).await?;

        if !run.settings.collection_mapping_enabled {
            warn!(storage_id, "Collection mapping is disabled for this storage");
            return Ok(MappingReport::default());
        }

        Ok(run
            .mapper
            .map_directory_structure_cancellable(root_path, cancel)
            .await)
    }

    pub async fn ingest_file(
        &self,
        path: impl AsRef<Path>,
        storage_id: &str,
    ) -> Result<IngestOutcome> {
        self.ingest_file_with(path, storage_id, IngestOptions::default())
            .await
    }

    pub async fn ingest_file_with(
        &self,
        path: impl AsRef<Path>,
        storage_id: &str,
        options: IngestOptions,
    ) -> Result<IngestOutcome> {
        let run = self.current_run(storage_id).await?;
        Ok(self.engine.ingest(&run, path.as_ref(), &options).await)
    }

    /// Ingest `paths` with up to `max_concurrent` files in flight.
    ///
    /// Cancellation is checked before each file starts; files already in
    /// flight finish.
    pub async fn ingest_batch(
        &self,
        paths: &[PathBuf],
        storage_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let run = self.current_run(storage_id).await?;
        let run = run.as_ref();
        let options = IngestOptions::default();
        let options = &options;

        info!(
            files = paths.len(),
            max_concurrent = self.config.max_concurrent,
            "Starting batch ingest"
        );

        let outcomes: Vec<BatchItem> = stream::iter(paths)
            .map(|path| async move {
                if cancel.is_cancelled() {
                    return BatchItem {
                        path: path.clone(),
                        outcome: None,
                    };
                }
                let outcome = self.engine.ingest(run, path, options).await;
                BatchItem {
                    path: path.clone(),
                    outcome: Some(outcome),
                }
            })
            .buffered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        let report = BatchReport {
            outcomes,
            cancelled: cancel.is_cancelled(),
        };

        info!(
            linked = report.count(IngestStatus::Linked),
            skipped = report.count(IngestStatus::Skipped),
            failed_retryable = report.count(IngestStatus::FailedRetryable),
            failed_fatal = report.count(IngestStatus::FailedFatal),
            not_attempted = report.not_attempted(),
            cancelled = report.cancelled,
            "Batch ingest finished"
        );

        Ok(report)
    }

    /// Begin a new run: fresh settings, no collections cached for the run
    async fn start_run(
        &self,
        storage_id: &str,
        walk_root: Option<&str>,
    ) -> Result<Arc<IngestRun>> {
        check_storage_id(storage_id)?;

        let mut current = self.run.lock().await;
        let run = Arc::new(self.build_run(storage_id, walk_root).await?);
        *current = Some(Arc::clone(&run));
        Ok(run)
    }

    /// The current run for `storage_id`, starting one if needed
    async fn current_run(&self, storage_id: &str) -> Result<Arc<IngestRun>> {
        check_storage_id(storage_id)?;

        let mut current = self.run.lock().await;
        if let Some(run) = current.as_ref() {
            if run.storage_id == storage_id {
                return Ok(Arc::clone(run));
            }
        }

        let run = Arc::new(self.build_run(storage_id, None).await?);
        *current = Some(Arc::clone(&run));
        Ok(run)
    }

    /// Fetch settings, fix the mapping root and point the cache at its scope
    async fn build_run(&self, storage_id: &str, walk_root: Option<&str>) -> Result<IngestRun> {
        let mut attempts = 0;
        let settings = match self
            .policy
            .run("storages-get", &mut attempts, || {
                self.client.storage_settings(storage_id)
            })
            .await
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!(storage_id, error = %e, "Could not fetch storage settings, using defaults");
                StorageSettings::default()
            }
        };

        let root_path = self
            .config
            .root_path
            .clone()
            .filter(|root| !root.is_empty())
            .or_else(|| walk_root.map(str::to_string).filter(|root| !root.is_empty()))
            .or_else(|| Some(settings.mount_point.clone()).filter(|m| !m.is_empty()))
            .unwrap_or_else(|| "/".to_string());

        let filter = ScanFilter::new(&settings.scan_include, &settings.scan_ignore)?;
        let root = MappingRoot {
            root_path: root_path.clone(),
            root_collection_id: settings.root_collection_id.clone(),
            mount_mapping: self.config.mount_mapping.clone(),
        };
        self.cache.begin_run(&root.scope(storage_id)).await;

        let mapper = DirectoryMapper::new(
            Arc::clone(&self.client),
            Arc::clone(&self.cache),
            self.policy.clone(),
            root,
        );

        info!(
            storage_id,
            root = %log_path(&root_path),
            persistent_cache = self.cache.is_persistent(),
            mapping_enabled = settings.collection_mapping_enabled,
            "Started ingest run"
        );

        Ok(IngestRun {
            storage_id: storage_id.to_string(),
            settings,
            mapper,
            filter,
        })
    }
}

fn check_storage_id(storage_id: &str) -> Result<()> {
    if storage_id.trim().is_empty() {
        return Err(SyncError::Config("storage_id is required".to_string()));
    }
    Ok(())
}
