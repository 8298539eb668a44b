//! # Ingest Engine
//!
//! Registers one file as a remote asset and attaches it to the collection of
//! its directory.
//!
//! ## Workflow
//!
//! 1. Validate the path against the mapping root, apply scan filters, load
//!    sidecar metadata (local, never retried)
//! 2. Fingerprint the content (`Pending → Checksummed`)
//! 3. Resume: a logged registration with the same checksum jumps to linking
//! 4. Dedup: checksum lookup, then external-id lookup (`→ DedupChecked`);
//!    a live hit ends the task as `Skipped`
//! 5. Create the asset (`Registering → Registered`), logged for resume
//! 6. Link to the directory collection and any extra collections
//!    (`Linking → Linked`)
//!
//! Remote steps run under the [`RetryPolicy`]; a failure ends the task as
//! `FailedRetryable` or `FailedFatal` and is reported, never raised.

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{AssetRef, DamClient, Metadata, NewAsset, StorageSettings};
use chrono::Utc;
use core_runtime::logging::log_path;
use tracing::{debug, info, instrument, warn};

use crate::checksum::{fingerprint, ChecksumIndex};
use crate::filters::ScanFilter;
use crate::mapper::DirectoryMapper;
use crate::path::PathSegments;
use crate::repository::{ResumeEntry, ResumeLog};
use crate::retry::RetryPolicy;
use crate::sidecar;
use crate::task::{IngestOutcome, IngestState, IngestStatus, IngestTask};
use crate::{Result, SyncError};

/// Caller overrides for a single file
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Replaces the path-derived external id
    pub external_id: Option<String>,
    /// Merged over sidecar metadata; these keys win
    pub metadata: Metadata,
    /// Collections to link in addition to the directory's own
    pub collection_ids: Vec<String>,
}

/// State shared by every file of one run
pub struct IngestRun {
    pub storage_id: String,
    pub settings: StorageSettings,
    pub mapper: DirectoryMapper,
    pub filter: ScanFilter,
}

pub struct IngestEngine {
    client: Arc<dyn DamClient>,
    policy: RetryPolicy,
    index: ChecksumIndex,
    resume_log: Arc<dyn ResumeLog>,
    dedup_enabled: bool,
    metadata_view_id: Option<String>,
}

impl IngestEngine {
    pub fn new(
        client: Arc<dyn DamClient>,
        policy: RetryPolicy,
        resume_log: Arc<dyn ResumeLog>,
        dedup_enabled: bool,
        metadata_view_id: Option<String>,
    ) -> Self {
        Self {
            index: ChecksumIndex::new(Arc::clone(&client), policy.clone()),
            client,
            policy,
            resume_log,
            dedup_enabled,
            metadata_view_id,
        }
    }

    /// Ingest one file. Per-file failures are part of the outcome.
    #[instrument(skip_all, fields(path = %log_path(&path.to_string_lossy()), storage_id = %run.storage_id))]
    pub async fn ingest(
        &self,
        run: &IngestRun,
        path: &Path,
        options: &IngestOptions,
    ) -> IngestOutcome {
        let mut task = IngestTask::new(path, run.storage_id.clone());

        if let Err(error) = self.drive(run, &mut task, options).await {
            if let Err(e) = task.fail(&error) {
                warn!(error = %e, "Could not record task failure");
            }
            self.remember(&task).await;
        }

        let outcome = task.outcome().unwrap_or_else(|e| IngestOutcome {
            source_path: task.source_path_str(),
            status: IngestStatus::FailedFatal,
            asset_id: task.asset_id.clone(),
            attempts: task.attempts,
            checksum: task.checksum.clone(),
            error: Some(e.to_string()),
        });

        match outcome.status {
            IngestStatus::FailedRetryable | IngestStatus::FailedFatal => warn!(
                status = %outcome.status,
                attempts = outcome.attempts,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Ingest failed"
            ),
            _ => info!(
                status = %outcome.status,
                asset_id = outcome.asset_id.as_deref().unwrap_or_default(),
                attempts = outcome.attempts,
                "Ingest finished"
            ),
        }

        outcome
    }

    async fn drive(
        &self,
        run: &IngestRun,
        task: &mut IngestTask,
        options: &IngestOptions,
    ) -> Result<()> {
        let path = task.source_path.clone();
        let source = task.source_path_str();
        let invalid = |reason: &str| SyncError::InvalidPath {
            path: source.clone(),
            reason: reason.to_string(),
        };

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| invalid("no file name"))?
            .to_string();
        let directory = path.parent().ok_or_else(|| invalid("no parent directory"))?;
        let dir_segments = run
            .mapper
            .root()
            .segments_for(&directory.to_string_lossy())?;

        run.filter.check(&file_name)?;

        let sidecar = sidecar::load_sidecar(&path).await?;
        if sidecar.is_none() && run.settings.sidecar_metadata_required {
            return Err(SyncError::SidecarMissing {
                path: source.clone(),
            });
        }

        let checksum = fingerprint(&path).await?;
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SyncError::Unreadable {
                path: source.clone(),
                message: e.to_string(),
            })?
            .len();
        task.checksum = Some(checksum.clone());
        task.transition_to(IngestState::Checksummed)?;
        debug!(checksum = %checksum, size, "Fingerprinted file");

        let remote_path = run.mapper.root().remote_path(&source);
        let external_id = match &options.external_id {
            Some(id) => id.clone(),
            None if run.settings.filename_is_external_id => file_name.clone(),
            None => remote_path.clone(),
        };

        if let Some(asset_id) = self.resumable_asset(&source, &checksum, &run.storage_id).await {
            info!(asset_id = %asset_id, "Resuming registered asset at linking");
            task.asset_id = Some(asset_id);
            task.transition_to(IngestState::Linking)?;
        } else {
            if self.dedup_enabled {
                if let Some(existing) = self
                    .find_duplicate(run, &mut task.attempts, &checksum, &external_id)
                    .await?
                {
                    task.transition_to(IngestState::DedupChecked)?;
                    task.asset_id = Some(existing.remote_id);
                    task.transition_to(IngestState::Skipped)?;
                    self.forget(&source).await;
                    return Ok(());
                }
            }
            task.transition_to(IngestState::DedupChecked)?;

            let asset = NewAsset {
                title: asset_title(&file_name, run.settings.title_includes_extension),
                external_id,
                file_name,
                path: remote_path,
                directory_path: dir_segments.join(),
                size,
                checksum,
                metadata_view_id: self
                    .metadata_view_id
                    .clone()
                    .or_else(|| run.settings.metadata_view_id.clone()),
                metadata: sidecar::merge(sidecar, &options.metadata),
            };

            if !asset.metadata.is_empty() {
                debug!(metadata = %sidecar::log_fields(&asset.metadata), "Asset metadata");
            }

            task.transition_to(IngestState::Registering)?;
            let created = self
                .policy
                .run("assets-create", &mut task.attempts, || {
                    self.client.asset_create(&run.storage_id, &asset)
                })
                .await?;
            info!(asset_id = %created.remote_id, "Registered asset");

            task.asset_id = Some(created.remote_id);
            task.transition_to(IngestState::Registered)?;
            self.remember(task).await;
            task.transition_to(IngestState::Linking)?;
        }

        let asset_id = task
            .asset_id
            .clone()
            .ok_or_else(|| SyncError::InvalidStatus("linking without an asset".to_string()))?;
        let targets = self.link_targets(run, &dir_segments, options).await?;
        task.collection_id = targets.first().cloned();

        for collection_id in &targets {
            self.policy
                .run("assets-link", &mut task.attempts, || {
                    self.client.asset_link_to_collection(&asset_id, collection_id)
                })
                .await?;
            debug!(collection_id = %collection_id, "Linked asset");
        }

        task.transition_to(IngestState::Linked)?;
        self.forget(&source).await;
        Ok(())
    }

    async fn find_duplicate(
        &self,
        run: &IngestRun,
        attempts: &mut u32,
        checksum: &str,
        external_id: &str,
    ) -> Result<Option<AssetRef>> {
        let by_checksum = self
            .index
            .find_existing(
                checksum,
                &run.storage_id,
                run.settings.aggregate_only_on_same_storage,
                attempts,
            )
            .await?;
        if let Some(asset) = by_checksum {
            debug!(asset_id = %asset.remote_id, "Checksum match");
            return Ok(Some(asset));
        }

        let by_identity = self.index.find_by_external_id(external_id, attempts).await?;
        if let Some(asset) = &by_identity {
            debug!(asset_id = %asset.remote_id, "External id match");
        }
        Ok(by_identity)
    }

    /// Directory collection (when mapping is enabled) followed by the caller's
    /// extra collections, without duplicates
    async fn link_targets(
        &self,
        run: &IngestRun,
        dir_segments: &PathSegments,
        options: &IngestOptions,
    ) -> Result<Vec<String>> {
        let mut targets: Vec<String> = Vec::new();

        // Files directly in an unparented root have no mapped collection
        let has_collection =
            !dir_segments.is_empty() || run.mapper.root().root_collection_id.is_some();
        if run.settings.collection_mapping_enabled && has_collection {
            let collection = run.mapper.ensure_segments(dir_segments).await?;
            targets.push(collection.remote_id);
        }

        for id in &options.collection_ids {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }

        Ok(targets)
    }

    async fn resumable_asset(&self, source: &str, checksum: &str, storage_id: &str) -> Option<String> {
        match self.resume_log.load(source).await {
            Ok(entry) => entry
                .as_ref()
                .and_then(|e| e.resumable_with(checksum, storage_id))
                .map(str::to_string),
            Err(e) => {
                warn!(error = %e, "Resume log unavailable, ingesting from scratch");
                None
            }
        }
    }

    async fn remember(&self, task: &IngestTask) {
        let entry = ResumeEntry {
            source_path: task.source_path_str(),
            storage_id: task.storage_id.clone(),
            checksum: task.checksum.clone(),
            asset_id: task.asset_id.clone(),
            state: task.state(),
            attempts: task.attempts,
            last_error: task.error.clone(),
            updated_at: Utc::now(),
        };

        if let Err(e) = self.resume_log.record(&entry).await {
            warn!(error = %e, state = %entry.state, "Failed to write resume log entry");
        }
    }

    async fn forget(&self, source: &str) {
        if let Err(e) = self.resume_log.remove(source).await {
            warn!(error = %e, "Failed to clear resume log entry");
        }
    }
}

/// Asset title derived from the file name
pub fn asset_title(file_name: &str, include_extension: bool) -> String {
    if include_extension {
        return file_name.to_string();
    }
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}
