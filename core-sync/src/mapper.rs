//! # Directory Mapper
//!
//! Mirrors a directory tree as a tree of remote collections.
//!
//! ## Overview
//!
//! Every directory below the walked root is normalized into [`PathSegments`]
//! and resolved through the [`CollectionCache`], which creates missing
//! ancestors before descendants. Directories are visited in component-wise
//! lexicographic order, so identical trees always produce identical remote
//! call sequences.
//!
//! ## Failure isolation
//!
//! A failed directory is recorded in the report and its whole subtree is
//! reported as [`SyncError::ParentUnavailable`] without further remote calls.
//! Siblings and unrelated subtrees carry on.

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{DamClient, RemoteCollection};
use core_runtime::logging::log_path;
use core_runtime::MountMapping;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::collection_cache::{CollectionCache, CollectionRef};
use crate::path::{normalize, PathSegments};
use crate::retry::RetryPolicy;
use crate::{Result, SyncError};

/// Per-directory failure
#[derive(Debug)]
pub struct MappingError {
    pub path: String,
    pub error: SyncError,
}

/// Result of mapping a directory tree
#[derive(Debug, Default)]
pub struct MappingReport {
    /// Leaf collection of every successfully mapped directory, in visit order
    pub mapped: Vec<CollectionRef>,
    pub errors: Vec<MappingError>,
    /// The walk stopped early on cancellation
    pub cancelled: bool,
}

impl MappingReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// Where collection paths are anchored for one run
#[derive(Debug, Clone, Default)]
pub struct MappingRoot {
    /// Filesystem root that maps to the top of the collection tree
    pub root_path: String,
    /// Parent of top-level collections; `None` puts them at the DAM's top level
    pub root_collection_id: Option<String>,
    pub mount_mapping: Option<MountMapping>,
}

impl MappingRoot {
    fn mapped(&self, path: &str) -> String {
        match &self.mount_mapping {
            Some(mapping) => mapping.apply(path),
            None => path.to_string(),
        }
    }

    /// Collection path of a local filesystem path
    pub fn segments_for(&self, local_path: &str) -> Result<PathSegments> {
        normalize(&self.mapped(local_path), &self.mapped(&self.root_path))
    }

    /// Local path after mount mapping
    pub fn remote_path(&self, local_path: &str) -> String {
        self.mapped(local_path)
    }

    /// Key under which this root's collections are remembered.
    ///
    /// Segments are only meaningful relative to the storage, the mapped root
    /// directory and the parent collection, so all three are part of it.
    pub fn scope(&self, storage_id: &str) -> String {
        format!(
            "{}|{}|{}",
            storage_id,
            self.mapped(&self.root_path),
            self.root_collection_id.as_deref().unwrap_or("")
        )
    }
}

/// Lookup-or-create of collections for directory paths
pub struct DirectoryMapper {
    client: Arc<dyn DamClient>,
    cache: Arc<CollectionCache>,
    policy: RetryPolicy,
    root: MappingRoot,
}

impl DirectoryMapper {
    pub fn new(
        client: Arc<dyn DamClient>,
        cache: Arc<CollectionCache>,
        policy: RetryPolicy,
        root: MappingRoot,
    ) -> Self {
        Self {
            client,
            cache,
            policy,
            root,
        }
    }

    pub fn root(&self) -> &MappingRoot {
        &self.root
    }

    /// Resolve the collection of a single directory, creating missing links
    pub async fn ensure_hierarchy(&self, path: &str) -> Result<CollectionRef> {
        let segments = self.root.segments_for(path)?;
        self.ensure_segments(&segments).await
    }

    /// Resolve already-normalized segments.
    ///
    /// The root itself resolves to the configured root collection without
    /// remote calls; with no root collection it has no collection of its own.
    pub async fn ensure_segments(&self, segments: &PathSegments) -> Result<CollectionRef> {
        if segments.is_empty() {
            if let Some(root_id) = &self.root.root_collection_id {
                return Ok(CollectionRef {
                    remote_id: root_id.clone(),
                    segments: segments.clone(),
                    parent_id: None,
                });
            }
        }

        self.cache
            .get_or_create(segments, |prefix, parent| self.lookup_or_create(prefix, parent))
            .await
    }

    /// Map every directory under `root` (the root itself excluded)
    pub async fn map_directory_structure(&self, root: &Path) -> MappingReport {
        self.map_directory_structure_cancellable(root, &CancellationToken::new())
            .await
    }

    /// Like [`map_directory_structure`](Self::map_directory_structure), checking
    /// `cancel` between directories
    #[instrument(skip_all, fields(root = %log_path(&root.to_string_lossy())))]
    pub async fn map_directory_structure_cancellable(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> MappingReport {
        let mut report = MappingReport::default();
        let mut directories: Vec<(PathSegments, String)> = Vec::new();

        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => {
                    let path = entry.path().to_string_lossy().into_owned();
                    match self.root.segments_for(&path) {
                        Ok(segments) => directories.push((segments, path)),
                        Err(error) => report.errors.push(MappingError { path, error }),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_else(|| root.to_string_lossy().into_owned());
                    report.errors.push(MappingError {
                        error: SyncError::Unreadable {
                            path: path.clone(),
                            message: e.to_string(),
                        },
                        path,
                    });
                }
            }
        }

        directories.sort();
        info!(directories = directories.len(), "Mapping directory tree");

        let mut failed: Vec<PathSegments> = Vec::new();

        for (segments, path) in directories {
            if cancel.is_cancelled() {
                warn!("Directory mapping cancelled");
                report.cancelled = true;
                break;
            }

            if let Some(ancestor) = failed.iter().find(|f| segments.starts_with(f)) {
                debug!(segments = %segments, "Skipping directory below failed ancestor");
                report.errors.push(MappingError {
                    error: SyncError::ParentUnavailable {
                        path: path.clone(),
                        ancestor: ancestor.to_string(),
                    },
                    path,
                });
                continue;
            }

            match self.ensure_segments(&segments).await {
                Ok(collection) => report.mapped.push(collection),
                Err(error) => {
                    warn!(
                        path = %log_path(&path),
                        error = %error,
                        "Failed to map directory"
                    );
                    failed.push(segments);
                    report.errors.push(MappingError { path, error });
                }
            }
        }

        info!(
            mapped = report.mapped.len(),
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "Directory mapping finished"
        );
        report
    }

    #[instrument(skip_all, fields(segments = %prefix))]
    async fn lookup_or_create(
        &self,
        prefix: PathSegments,
        parent: Option<CollectionRef>,
    ) -> Result<CollectionRef> {
        let name = prefix.name().ok_or_else(|| SyncError::InvalidPath {
            path: prefix.to_string(),
            reason: "empty collection path".to_string(),
        })?;
        let parent_id = parent
            .map(|p| p.remote_id)
            .or_else(|| self.root.root_collection_id.clone());

        let mut attempts = 0;
        let existing = self
            .policy
            .run("collections-get", &mut attempts, || {
                self.client.collection_lookup(parent_id.as_deref(), name)
            })
            .await?;

        let remote = match existing {
            Some(found) if found.name == name => {
                debug!(collection_id = %found.id, "Reusing existing collection");
                found
            }
            Some(found) if found.name.to_lowercase() == name.to_lowercase() => {
                return Err(SyncError::CollectionCollision {
                    requested: prefix.to_string(),
                    existing: found.name,
                });
            }
            _ => self.create(parent_id.as_deref(), name).await?,
        };

        Ok(CollectionRef {
            remote_id: remote.id,
            segments: prefix,
            parent_id,
        })
    }

    async fn create(&self, parent_id: Option<&str>, name: &str) -> Result<RemoteCollection> {
        let mut attempts = 0;
        let created = self
            .policy
            .run("collections-create", &mut attempts, || {
                self.client.collection_create(parent_id, name)
            })
            .await?;

        info!(collection_id = %created.id, name, "Created collection");
        Ok(created)
    }
}
