use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Transient remote failure during {operation}: {message}")]
    TransientRemote { operation: String, message: String },

    #[error("Remote rejected request: {0}")]
    FatalRemote(String),

    #[error("Parent collection unavailable for {path}: {ancestor} failed")]
    ParentUnavailable { path: String, ancestor: String },

    #[error("Collection name collision: requested '{requested}', remote has '{existing}'")]
    CollectionCollision { requested: String, existing: String },

    #[error("Cannot read {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("File {file_name} rejected by scan filter: {reason}")]
    Filtered { file_name: String, reason: String },

    #[error("No sidecar metadata found for {path}")]
    SidecarMissing { path: String },

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid ingest state: {0}")]
    InvalidStatus(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl SyncError {
    /// Whether repeating the same remote step can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientRemote { .. } | SyncError::Timeout { .. }
        )
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Transient { operation, message } => {
                SyncError::TransientRemote { operation, message }
            }
            BridgeError::Rejected { status, message } => {
                SyncError::FatalRemote(format!("status {}: {}", status, message))
            }
            BridgeError::NotAvailable(message) => SyncError::FatalRemote(message),
            BridgeError::Io(e) => SyncError::FatalRemote(e.to_string()),
        }
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(error: core_runtime::Error) -> Self {
        SyncError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_classification() {
        let transient: SyncError = BridgeError::transient("assets-create", "429").into();
        assert!(transient.is_retryable());

        let rejected: SyncError = BridgeError::rejected(400, "bad storage id").into();
        assert!(!rejected.is_retryable());
        assert!(matches!(rejected, SyncError::FatalRemote(ref m) if m.contains("400")));

        let timeout = SyncError::Timeout {
            operation: "collections-create".to_string(),
            timeout_ms: 10,
        };
        assert!(timeout.is_retryable());

        assert!(!SyncError::ParentUnavailable {
            path: "/data/a/b".to_string(),
            ancestor: "a".to_string(),
        }
        .is_retryable());
    }
}
