//! # Checksum Index
//!
//! Content fingerprints and the remote lookups that turn them into dedup
//! decisions.
//!
//! Fingerprints are SHA-256 over the file bytes, lowercase hex, read in
//! 64 KiB chunks so large media files never sit in memory.

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{AssetRef, DamClient};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::retry::RetryPolicy;
use crate::{Result, SyncError};

pub const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 of the file content as lowercase hex
///
/// # Errors
///
/// `SyncError::Unreadable` if the file cannot be opened or read.
pub async fn fingerprint(path: &Path) -> Result<String> {
    let unreadable = |e: std::io::Error| SyncError::Unreadable {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let mut file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer).await.map_err(unreadable)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Remote existence checks for candidate files
pub struct ChecksumIndex {
    client: Arc<dyn DamClient>,
    policy: RetryPolicy,
}

impl ChecksumIndex {
    pub fn new(client: Arc<dyn DamClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Live asset with this checksum, if any.
    ///
    /// Trashed assets never count. With `same_storage_only`, assets on another
    /// storage are ignored as well.
    #[instrument(skip(self, attempts))]
    pub async fn find_existing(
        &self,
        checksum: &str,
        storage_id: &str,
        same_storage_only: bool,
        attempts: &mut u32,
    ) -> Result<Option<AssetRef>> {
        let hit = self
            .policy
            .run("assets-find-by-checksum", attempts, || {
                self.client.asset_lookup_by_checksum(checksum, storage_id)
            })
            .await?;

        Ok(hit.filter(|asset| {
            if asset.deleted {
                debug!(asset_id = %asset.remote_id, "Ignoring trashed checksum match");
                return false;
            }
            if same_storage_only
                && asset.storage_id.as_deref().is_some_and(|s| s != storage_id)
            {
                debug!(asset_id = %asset.remote_id, "Ignoring checksum match on another storage");
                return false;
            }
            true
        }))
    }

    /// Live asset registered under this external id, if any
    #[instrument(skip(self, attempts))]
    pub async fn find_by_external_id(
        &self,
        external_id: &str,
        attempts: &mut u32,
    ) -> Result<Option<AssetRef>> {
        let hit = self
            .policy
            .run("assets-find-by-external-id", attempts, || {
                self.client.asset_lookup_by_external_id(external_id)
            })
            .await?;

        Ok(hit.filter(|asset| !asset.deleted))
    }
}
