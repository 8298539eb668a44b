//! Sidecar metadata files.
//!
//! A JSON object stored next to a media file as `<file>.json` (e.g.
//! `clip.mov.json`) or `<stem>.json` (`clip.json`) supplies extra asset
//! metadata. XML and CSV sidecars are recognised but not parsed.

use std::path::{Path, PathBuf};

use bridge_traits::Metadata;
use tracing::{debug, warn};

use core_runtime::logging::{log_path, redact_if_sensitive};

use crate::{Result, SyncError};

const UNSUPPORTED_EXTENSIONS: &[&str] = &["xml", "csv"];

fn candidates(path: &Path, extension: &str) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(2);

    if let Some(name) = path.file_name() {
        let mut with_suffix = name.to_os_string();
        with_suffix.push(".");
        with_suffix.push(extension);
        paths.push(path.with_file_name(with_suffix));
    }

    let stem = path.with_extension(extension);
    if stem != path && !paths.contains(&stem) {
        paths.push(stem);
    }

    paths
}

/// Load the JSON sidecar of `path`, if one exists
///
/// # Errors
///
/// `SyncError::Unreadable` when a sidecar exists but cannot be read or is not
/// a JSON object.
pub async fn load_sidecar(path: &Path) -> Result<Option<Metadata>> {
    for candidate in candidates(path, "json") {
        let raw = match tokio::fs::read_to_string(&candidate).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(SyncError::Unreadable {
                    path: candidate.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| SyncError::Unreadable {
                path: candidate.display().to_string(),
                message: format!("invalid sidecar JSON: {}", e),
            })?;

        return match value {
            serde_json::Value::Object(map) => {
                debug!(
                    sidecar = %log_path(&candidate.to_string_lossy()),
                    fields = map.len(),
                    "Loaded sidecar metadata"
                );
                Ok(Some(map))
            }
            _ => Err(SyncError::Unreadable {
                path: candidate.display().to_string(),
                message: "sidecar JSON is not an object".to_string(),
            }),
        };
    }

    for extension in UNSUPPORTED_EXTENSIONS {
        for candidate in candidates(path, extension) {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                warn!(
                    sidecar = %log_path(&candidate.to_string_lossy()),
                    "Ignoring {} sidecar, only JSON sidecars are supported",
                    extension
                );
            }
        }
    }

    Ok(None)
}

/// Sidecar fields overlaid with caller metadata; caller keys win
pub fn merge(sidecar: Option<Metadata>, caller: &Metadata) -> Metadata {
    let mut merged = sidecar.unwrap_or_default();
    for (key, value) in caller {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// `key=value` rendering of metadata for log fields, with credentials and
/// email addresses redacted
pub fn log_fields(metadata: &Metadata) -> String {
    metadata
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            format!("{}={}", key, redact_if_sensitive(key, &rendered))
        })
        .collect::<Vec<_>>()
        .join(", ")
}
