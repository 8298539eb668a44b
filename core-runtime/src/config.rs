//! # Ingest Configuration
//!
//! Options recognised by the directory mapper and ingest engine.
//!
//! ## Overview
//!
//! [`IngestConfig`] is built with [`IngestConfig::builder`], loaded from a JSON
//! document with [`IngestConfig::from_json_file`], or read from `DAM_*`
//! environment variables with [`IngestConfig::from_env`]. Every path through
//! which a config is produced ends in [`IngestConfig::validate`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::IngestConfig;
//!
//! let config = IngestConfig::builder()
//!     .storage_id("fs-media")
//!     .root_path("/data")
//!     .max_attempts(5)
//!     .build()?;
//! ```
//!
//! ## Mount mapping
//!
//! A [`MountMapping`] rewrites a local path prefix into the prefix the remote
//! storage knows, e.g. `"/Volumes/media:/mnt/media"`. It is applied before
//! storage-relative paths and default external ids are computed.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default attempt budget of one ingest task
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the first retry
pub const DEFAULT_BACKOFF_BASE_SECONDS: f64 = 0.5;
/// Default ceiling for a single backoff delay
pub const DEFAULT_MAX_BACKOFF_SECONDS: f64 = 30.0;
/// Default timeout applied to every remote call
pub const DEFAULT_CALL_TIMEOUT_SECONDS: f64 = 60.0;

/// Prefix rewrite from a local mount to the path the storage is configured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MountMapping {
    pub local_prefix: String,
    pub remote_prefix: String,
}

impl MountMapping {
    /// Parse a `"local_prefix:remote_prefix"` pair
    pub fn parse(raw: &str) -> Result<Self> {
        let (local, remote) = raw.split_once(':').ok_or_else(|| {
            Error::Config(format!(
                "Invalid mount mapping '{}': expected 'local_prefix:remote_prefix'",
                raw
            ))
        })?;

        let local = local.trim();
        let remote = remote.trim();
        if local.is_empty() || remote.is_empty() {
            return Err(Error::Config(format!(
                "Invalid mount mapping '{}': both prefixes must be non-empty",
                raw
            )));
        }

        Ok(Self {
            local_prefix: local.to_string(),
            remote_prefix: remote.to_string(),
        })
    }

    /// Rewrite `path` if it lies under the local prefix.
    ///
    /// The match is on whole path components, so `/media` does not rewrite
    /// `/media2/file`.
    pub fn apply(&self, path: &str) -> String {
        let local = self.local_prefix.trim_end_matches('/');
        let remote = self.remote_prefix.trim_end_matches('/');

        match path.strip_prefix(local) {
            Some("") => {
                if remote.is_empty() {
                    "/".to_string()
                } else {
                    remote.to_string()
                }
            }
            Some(rest) if rest.starts_with('/') => format!("{}{}", remote, rest),
            _ => path.to_string(),
        }
    }
}

impl TryFrom<String> for MountMapping {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MountMapping> for String {
    fn from(mapping: MountMapping) -> Self {
        format!("{}:{}", mapping.local_prefix, mapping.remote_prefix)
    }
}

/// Ingest and mapping options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Target storage (required)
    #[serde(default)]
    pub storage_id: String,

    /// Root the collection hierarchy is computed against.
    /// Falls back to the storage's mount point when unset.
    #[serde(default)]
    pub root_path: Option<String>,

    #[serde(default)]
    pub mount_mapping: Option<MountMapping>,

    /// Attempt budget of a task, shared by its remote steps. A retryable
    /// failure once it is spent ends the task as a retryable failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_seconds: f64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: f64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: f64,

    /// Skip files whose content is already registered
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,

    /// Files ingested concurrently by a batch
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub metadata_view_id: Option<String>,

    /// SQLite database for the durable resume log. In-memory when unset.
    #[serde(default)]
    pub resume_log_path: Option<String>,

    /// SQLite database remembering mapped collections across runs.
    /// Collections are only cached for the current run when unset.
    #[serde(default)]
    pub collection_cache_path: Option<String>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base() -> f64 {
    DEFAULT_BACKOFF_BASE_SECONDS
}

fn default_max_backoff() -> f64 {
    DEFAULT_MAX_BACKOFF_SECONDS
}

fn default_call_timeout() -> f64 {
    DEFAULT_CALL_TIMEOUT_SECONDS
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    1
}

impl IngestConfig {
    /// Create a new configuration builder
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Load and validate a JSON configuration document
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("Invalid config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `DAM_*` environment variables
    ///
    /// Recognised: `DAM_STORAGE_ID`, `DAM_ROOT_PATH`, `DAM_MOUNT_MAPPING`,
    /// `DAM_MAX_ATTEMPTS`, `DAM_BACKOFF_BASE_SECONDS`, `DAM_DEDUP_ENABLED`,
    /// `DAM_RESUME_LOG_PATH`, `DAM_COLLECTION_CACHE_PATH`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(storage_id) = lookup("DAM_STORAGE_ID") {
            builder = builder.storage_id(storage_id);
        }
        if let Some(root) = lookup("DAM_ROOT_PATH") {
            builder = builder.root_path(root);
        }
        if let Some(mapping) = lookup("DAM_MOUNT_MAPPING") {
            builder = builder.mount_mapping(MountMapping::parse(&mapping)?);
        }
        if let Some(raw) = lookup("DAM_MAX_ATTEMPTS") {
            let attempts = raw.trim().parse::<u32>().map_err(|e| {
                Error::Config(format!("DAM_MAX_ATTEMPTS must be an integer: {}", e))
            })?;
            builder = builder.max_attempts(attempts);
        }
        if let Some(raw) = lookup("DAM_BACKOFF_BASE_SECONDS") {
            let base = raw.trim().parse::<f64>().map_err(|e| {
                Error::Config(format!("DAM_BACKOFF_BASE_SECONDS must be a number: {}", e))
            })?;
            builder = builder.backoff_base_seconds(base);
        }
        if let Some(raw) = lookup("DAM_DEDUP_ENABLED") {
            builder = builder.dedup_enabled(parse_bool(&raw)?);
        }
        if let Some(path) = lookup("DAM_RESUME_LOG_PATH") {
            builder = builder.resume_log_path(path);
        }
        if let Some(path) = lookup("DAM_COLLECTION_CACHE_PATH") {
            builder = builder.collection_cache_path(path);
        }

        builder.build()
    }

    /// Validate option ranges
    pub fn validate(&self) -> Result<()> {
        if self.storage_id.trim().is_empty() {
            return Err(Error::Config("storage_id is required".to_string()));
        }

        if let Some(root) = &self.root_path {
            if !root.starts_with('/') {
                return Err(Error::Config(format!(
                    "root_path must be absolute, got '{}'",
                    root
                )));
            }
        }

        if self.max_attempts == 0 {
            return Err(Error::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        seconds("backoff_base_seconds", self.backoff_base_seconds)?;
        seconds("max_backoff_seconds", self.max_backoff_seconds)?;
        if seconds("call_timeout_seconds", self.call_timeout_seconds)?.is_zero() {
            return Err(Error::Config(
                "call_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent == 0 {
            return Err(Error::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Out-of-range values (only possible without [`validate`](Self::validate))
    /// fall back to the defaults.
    pub fn backoff_base(&self) -> Duration {
        duration_or(self.backoff_base_seconds, DEFAULT_BACKOFF_BASE_SECONDS)
    }

    pub fn max_backoff(&self) -> Duration {
        duration_or(self.max_backoff_seconds, DEFAULT_MAX_BACKOFF_SECONDS)
    }

    pub fn call_timeout(&self) -> Duration {
        duration_or(self.call_timeout_seconds, DEFAULT_CALL_TIMEOUT_SECONDS)
    }
}

/// A non-negative number of seconds that fits a [`Duration`]
fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        Error::Config(format!(
            "{} must be a non-negative number of seconds in range, got {}",
            name, value
        ))
    })
}

fn duration_or(value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(default))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "Expected a boolean, got '{}'",
            other
        ))),
    }
}

/// Builder for [`IngestConfig`]
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    storage_id: Option<String>,
    root_path: Option<String>,
    mount_mapping: Option<MountMapping>,
    max_attempts: Option<u32>,
    backoff_base_seconds: Option<f64>,
    max_backoff_seconds: Option<f64>,
    call_timeout_seconds: Option<f64>,
    dedup_enabled: Option<bool>,
    max_concurrent: Option<usize>,
    metadata_view_id: Option<String>,
    resume_log_path: Option<String>,
    collection_cache_path: Option<String>,
}

impl IngestConfigBuilder {
    /// Set the target storage (required)
    pub fn storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = Some(storage_id.into());
        self
    }

    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = Some(root_path.into());
        self
    }

    pub fn mount_mapping(mut self, mapping: MountMapping) -> Self {
        self.mount_mapping = Some(mapping);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff_base_seconds(mut self, seconds: f64) -> Self {
        self.backoff_base_seconds = Some(seconds);
        self
    }

    pub fn max_backoff_seconds(mut self, seconds: f64) -> Self {
        self.max_backoff_seconds = Some(seconds);
        self
    }

    pub fn call_timeout_seconds(mut self, seconds: f64) -> Self {
        self.call_timeout_seconds = Some(seconds);
        self
    }

    pub fn dedup_enabled(mut self, enabled: bool) -> Self {
        self.dedup_enabled = Some(enabled);
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    pub fn metadata_view_id(mut self, view_id: impl Into<String>) -> Self {
        self.metadata_view_id = Some(view_id.into());
        self
    }

    /// Persist the resume log in a SQLite database at this path
    pub fn resume_log_path(mut self, path: impl Into<String>) -> Self {
        self.resume_log_path = Some(path.into());
        self
    }

    /// Remember mapped collections across runs in a SQLite database at this path
    pub fn collection_cache_path(mut self, path: impl Into<String>) -> Self {
        self.collection_cache_path = Some(path.into());
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `storage_id` is missing or an option is out
    /// of range.
    pub fn build(self) -> Result<IngestConfig> {
        let storage_id = self.storage_id.ok_or_else(|| {
            Error::Config("storage_id is required. Use .storage_id() to set it.".to_string())
        })?;

        let config = IngestConfig {
            storage_id,
            root_path: self.root_path,
            mount_mapping: self.mount_mapping,
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            backoff_base_seconds: self
                .backoff_base_seconds
                .unwrap_or(DEFAULT_BACKOFF_BASE_SECONDS),
            max_backoff_seconds: self
                .max_backoff_seconds
                .unwrap_or(DEFAULT_MAX_BACKOFF_SECONDS),
            call_timeout_seconds: self
                .call_timeout_seconds
                .unwrap_or(DEFAULT_CALL_TIMEOUT_SECONDS),
            dedup_enabled: self.dedup_enabled.unwrap_or(true),
            max_concurrent: self.max_concurrent.unwrap_or(1),
            metadata_view_id: self.metadata_view_id,
            resume_log_path: self.resume_log_path,
            collection_cache_path: self.collection_cache_path,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_builder_defaults() {
        let config = IngestConfig::builder().storage_id("fs-1").build().unwrap();

        assert_eq!(config.storage_id, "fs-1");
        assert_eq!(config.root_path, None);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base(), Duration::from_millis(500));
        assert_eq!(config.max_backoff(), Duration::from_secs(30));
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
        assert!(config.dedup_enabled);
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn test_builder_missing_storage_id() {
        let result = IngestConfig::builder().root_path("/data").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        assert!(IngestConfig::builder()
            .storage_id("s")
            .max_attempts(0)
            .build()
            .is_err());
        assert!(IngestConfig::builder()
            .storage_id("s")
            .call_timeout_seconds(0.0)
            .build()
            .is_err());
        assert!(IngestConfig::builder()
            .storage_id("s")
            .backoff_base_seconds(-1.0)
            .build()
            .is_err());
        assert!(IngestConfig::builder()
            .storage_id("  ")
            .build()
            .is_err());
        assert!(IngestConfig::builder()
            .storage_id("s")
            .root_path("relative/dir")
            .build()
            .is_err());
    }

    #[test]
    fn test_validation_rejects_durations_out_of_range() {
        let result = IngestConfig::builder()
            .storage_id("s")
            .call_timeout_seconds(1e20)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = IngestConfig::builder()
            .storage_id("s")
            .max_backoff_seconds(f64::MAX)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = IngestConfig::builder()
            .storage_id("s")
            .backoff_base_seconds(f64::NAN)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unvalidated_durations_fall_back_to_defaults() {
        let mut config = IngestConfig::builder().storage_id("s").build().unwrap();
        config.call_timeout_seconds = 1e20;
        config.backoff_base_seconds = -3.0;

        assert_eq!(
            config.call_timeout(),
            Duration::from_secs_f64(DEFAULT_CALL_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.backoff_base(),
            Duration::from_secs_f64(DEFAULT_BACKOFF_BASE_SECONDS)
        );
    }

    #[test]
    fn test_mount_mapping_parse_and_apply() {
        let mapping = MountMapping::parse("/Volumes/media:/mnt/media").unwrap();
        assert_eq!(mapping.local_prefix, "/Volumes/media");
        assert_eq!(mapping.remote_prefix, "/mnt/media");

        assert_eq!(
            mapping.apply("/Volumes/media/2024/a.mov"),
            "/mnt/media/2024/a.mov"
        );
        assert_eq!(mapping.apply("/Volumes/media"), "/mnt/media");
        assert_eq!(mapping.apply("/Volumes/media2/a.mov"), "/Volumes/media2/a.mov");
        assert_eq!(mapping.apply("/other/a.mov"), "/other/a.mov");
    }

    #[test]
    fn test_mount_mapping_rejects_malformed() {
        assert!(MountMapping::parse("no-separator").is_err());
        assert!(MountMapping::parse(":/remote").is_err());
        assert!(MountMapping::parse("/local:").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"storage_id": "fs-2", "root_path": "/data", "mount_mapping": "/local:/remote", "max_attempts": 5, "dedup_enabled": false}}"#
        )
        .unwrap();

        let config = IngestConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.storage_id, "fs-2");
        assert_eq!(config.root_path.as_deref(), Some("/data"));
        assert_eq!(
            config.mount_mapping,
            Some(MountMapping::parse("/local:/remote").unwrap())
        );
        assert_eq!(config.max_attempts, 5);
        assert!(!config.dedup_enabled);
        assert_eq!(config.backoff_base_seconds, DEFAULT_BACKOFF_BASE_SECONDS);
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = IngestConfig::from_json_file("/nonexistent/dam-sync.json");
        assert!(matches!(result, Err(Error::ConfigFile { .. })));
    }

    #[test]
    fn test_from_json_file_rejects_bad_mapping() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"storage_id": "fs-2", "mount_mapping": "broken"}}"#).unwrap();

        let result = IngestConfig::from_json_file(file.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("DAM_STORAGE_ID", "fs-3"),
            ("DAM_ROOT_PATH", "/srv/media"),
            ("DAM_MAX_ATTEMPTS", "7"),
            ("DAM_BACKOFF_BASE_SECONDS", "0.25"),
            ("DAM_DEDUP_ENABLED", "false"),
            ("DAM_COLLECTION_CACHE_PATH", "/var/lib/dam/collections.db"),
        ]
        .into_iter()
        .collect();

        let config =
            IngestConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.storage_id, "fs-3");
        assert_eq!(config.root_path.as_deref(), Some("/srv/media"));
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.backoff_base(), Duration::from_millis(250));
        assert!(!config.dedup_enabled);
        assert_eq!(
            config.collection_cache_path.as_deref(),
            Some("/var/lib/dam/collections.db")
        );
        assert!(config.resume_log_path.is_none());
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let result = IngestConfig::from_lookup(|key| match key {
            "DAM_STORAGE_ID" => Some("fs".to_string()),
            "DAM_MAX_ATTEMPTS" => Some("many".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
