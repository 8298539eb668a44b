//! Digital Asset Management (DAM) Service Abstractions
//!
//! Capability contract for the remote DAM service the core synchronizes
//! against. The HTTP client, authentication and token refresh live behind
//! this trait; the core only sees collections, assets and storage settings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Free-form asset metadata, keyed by field name
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A collection (remote folder) as returned by the DAM service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCollection {
    /// Opaque collection identifier
    pub id: String,
    /// Display name of the collection
    pub name: String,
    /// Parent collection, `None` for top-level collections
    pub parent_id: Option<String>,
}

/// A registered asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Opaque asset identifier
    pub remote_id: String,
    /// Content fingerprint of the asset's original file
    pub checksum: Option<String>,
    /// Caller-assigned identity (usually the source path)
    pub external_id: Option<String>,
    /// Storage the original file lives on
    #[serde(default)]
    pub storage_id: Option<String>,
    /// Asset has been moved to the trash but not purged yet
    #[serde(default)]
    pub deleted: bool,
}

/// Asset registration request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAsset {
    pub title: String,
    pub external_id: String,
    pub file_name: String,
    /// Absolute path of the source file after mount mapping
    pub path: String,
    /// Directory of the file relative to the storage mount point
    pub directory_path: String,
    pub size: u64,
    pub checksum: String,
    pub metadata_view_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Storage configuration held by the DAM service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Filesystem root the storage is configured against
    pub mount_point: String,
    /// Parent for top-level mapped collections
    pub root_collection_id: Option<String>,
    /// Whether directories are mirrored as collections
    pub collection_mapping_enabled: bool,
    pub title_includes_extension: bool,
    pub filename_is_external_id: bool,
    pub aggregate_only_on_same_storage: bool,
    /// Glob or `re:/<regex>/` patterns a file name must match
    pub scan_include: Vec<String>,
    /// Glob or `re:/<regex>/` patterns that exclude a file name
    pub scan_ignore: Vec<String>,
    pub sidecar_metadata_required: bool,
    pub metadata_view_id: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            mount_point: "/".to_string(),
            root_collection_id: None,
            collection_mapping_enabled: true,
            title_includes_extension: true,
            filename_is_external_id: false,
            aggregate_only_on_same_storage: false,
            scan_include: Vec::new(),
            scan_ignore: Vec::new(),
            sidecar_metadata_required: false,
            metadata_view_id: None,
        }
    }
}

/// Remote DAM service capability
///
/// Every method is a single remote call. Implementations must report
/// retryable conditions (rate limiting, timeouts, 5xx) as
/// [`BridgeError::Transient`](crate::error::BridgeError::Transient) and
/// refusals as [`BridgeError::Rejected`](crate::error::BridgeError::Rejected);
/// the core decides whether to retry from that distinction alone.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::dam::DamClient;
///
/// async fn ensure_folder(client: &dyn DamClient, name: &str) -> Result<String> {
///     if let Some(existing) = client.collection_lookup(None, name).await? {
///         return Ok(existing.id);
///     }
///     Ok(client.collection_create(None, name).await?.id)
/// }
/// ```
#[async_trait]
pub trait DamClient: Send + Sync {
    /// Fetch the settings of a storage
    async fn storage_settings(&self, storage_id: &str) -> Result<StorageSettings>;

    /// Find a child collection by exact name
    ///
    /// Returns `Ok(None)` when no such collection exists.
    async fn collection_lookup(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<RemoteCollection>>;

    /// Create a child collection
    async fn collection_create(&self, parent_id: Option<&str>, name: &str)
        -> Result<RemoteCollection>;

    /// Find an asset whose original file has the given checksum
    async fn asset_lookup_by_checksum(
        &self,
        checksum: &str,
        storage_id: &str,
    ) -> Result<Option<AssetRef>>;

    /// Find an asset by its external id
    async fn asset_lookup_by_external_id(&self, external_id: &str) -> Result<Option<AssetRef>>;

    /// Register a file as a new asset
    async fn asset_create(&self, storage_id: &str, asset: &NewAsset) -> Result<AssetRef>;

    /// Add an asset to a collection
    async fn asset_link_to_collection(&self, asset_id: &str, collection_id: &str) -> Result<()>;
}
