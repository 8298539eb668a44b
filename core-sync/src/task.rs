//! # Ingest Task State Machine
//!
//! Lifecycle of a single file's ingest with validated state transitions.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Checksummed → DedupChecked → Registering → Registered → Linking → Linked
//!    │           │              │              │                        │
//!    │           │              └→ Skipped     │                        │
//!    │           └──────────────────────────────────────→ Linking (resume)
//!    └───────────┴──────────────────────────────┴────────────────────────┴→ FailedRetryable | FailedFatal
//! ```
//!
//! `Skipped`, `Linked`, `FailedRetryable` and `FailedFatal` are terminal.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, SyncError};

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for an ingest task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngestTaskId(Uuid);

impl IngestTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IngestTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IngestTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Pending,
    Checksummed,
    DedupChecked,
    Skipped,
    Registering,
    Registered,
    Linking,
    Linked,
    FailedRetryable,
    FailedFatal,
}

impl IngestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestState::Skipped
                | IngestState::Linked
                | IngestState::FailedRetryable
                | IngestState::FailedFatal
        )
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Pending => "pending",
            IngestState::Checksummed => "checksummed",
            IngestState::DedupChecked => "dedup_checked",
            IngestState::Skipped => "skipped",
            IngestState::Registering => "registering",
            IngestState::Registered => "registered",
            IngestState::Linking => "linking",
            IngestState::Linked => "linked",
            IngestState::FailedRetryable => "failed_retryable",
            IngestState::FailedFatal => "failed_fatal",
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: IngestState) -> bool {
        use IngestState::*;

        match (self, next) {
            (Pending, Checksummed) => true,
            (Checksummed, DedupChecked) => true,
            // A resumed task already has its asset
            (Checksummed, Linking) => true,
            (DedupChecked, Skipped) => true,
            (DedupChecked, Registering) => true,
            (Registering, Registered) => true,
            (Registered, Linking) => true,
            (Linking, Linked) => true,
            (Pending | Checksummed | Registering | Linking, FailedRetryable | FailedFatal) => true,
            _ => false,
        }
    }
}

impl FromStr for IngestState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(IngestState::Pending),
            "checksummed" => Ok(IngestState::Checksummed),
            "dedup_checked" => Ok(IngestState::DedupChecked),
            "skipped" => Ok(IngestState::Skipped),
            "registering" => Ok(IngestState::Registering),
            "registered" => Ok(IngestState::Registered),
            "linking" => Ok(IngestState::Linking),
            "linked" => Ok(IngestState::Linked),
            "failed_retryable" => Ok(IngestState::FailedRetryable),
            "failed_fatal" => Ok(IngestState::FailedFatal),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for IngestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final status reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStatus {
    /// Equivalent asset already registered, nothing written
    Skipped,
    Linked,
    /// Attempts exhausted on a transient failure; safe to re-submit
    FailedRetryable,
    FailedFatal,
}

impl IngestStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, IngestStatus::Skipped | IngestStatus::Linked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Skipped => "SKIPPED",
            IngestStatus::Linked => "LINKED",
            IngestStatus::FailedRetryable => "FAILED_RETRYABLE",
            IngestStatus::FailedFatal => "FAILED_FATAL",
        }
    }
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-file result of an ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub source_path: String,
    pub status: IngestStatus,
    pub asset_id: Option<String>,
    /// Attempts spent from the budget shared by all remote steps
    pub attempts: u32,
    pub checksum: Option<String>,
    /// Failure reason for the `FAILED_*` statuses
    pub error: Option<String>,
}

// ============================================================================
// Ingest Task
// ============================================================================

/// One file moving through the ingest states
#[derive(Debug, Clone)]
pub struct IngestTask {
    pub id: IngestTaskId,
    pub source_path: PathBuf,
    pub storage_id: String,
    pub collection_id: Option<String>,
    pub checksum: Option<String>,
    pub asset_id: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
    state: IngestState,
}

impl IngestTask {
    pub fn new(source_path: impl AsRef<Path>, storage_id: impl Into<String>) -> Self {
        Self {
            id: IngestTaskId::new(),
            source_path: source_path.as_ref().to_path_buf(),
            storage_id: storage_id.into(),
            collection_id: None,
            checksum: None,
            asset_id: None,
            attempts: 0,
            error: None,
            state: IngestState::Pending,
        }
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn source_path_str(&self) -> String {
        self.source_path.to_string_lossy().into_owned()
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// `SyncError::InvalidStateTransition` if `next` is not a legal successor.
    pub fn transition_to(&mut self, next: IngestState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
                reason: "not a legal ingest step".to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Terminate with a failure classified by retryability
    pub fn fail(&mut self, error: &SyncError) -> Result<()> {
        let next = if error.is_retryable() {
            IngestState::FailedRetryable
        } else {
            IngestState::FailedFatal
        };
        self.transition_to(next)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    /// Outcome of a task in a terminal state
    pub fn outcome(&self) -> Result<IngestOutcome> {
        let status = match self.state {
            IngestState::Skipped => IngestStatus::Skipped,
            IngestState::Linked => IngestStatus::Linked,
            IngestState::FailedRetryable => IngestStatus::FailedRetryable,
            IngestState::FailedFatal => IngestStatus::FailedFatal,
            other => {
                return Err(SyncError::InvalidStatus(format!(
                    "task {} is still {}",
                    self.id, other
                )))
            }
        };

        Ok(IngestOutcome {
            source_path: self.source_path_str(),
            status,
            asset_id: self.asset_id.clone(),
            attempts: self.attempts,
            checksum: self.checksum.clone(),
            error: self.error.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut task = IngestTask::new("/data/a.mov", "fs-1");
        assert_eq!(task.state(), IngestState::Pending);

        for next in [
            IngestState::Checksummed,
            IngestState::DedupChecked,
            IngestState::Registering,
            IngestState::Registered,
            IngestState::Linking,
            IngestState::Linked,
        ] {
            task.transition_to(next).unwrap();
        }

        task.asset_id = Some("asset-1".to_string());
        let outcome = task.outcome().unwrap();
        assert_eq!(outcome.status, IngestStatus::Linked);
        assert_eq!(outcome.asset_id.as_deref(), Some("asset-1"));
    }

    #[test]
    fn test_skip_and_resume_paths() {
        let mut skipped = IngestTask::new("/data/b.mov", "fs-1");
        skipped.transition_to(IngestState::Checksummed).unwrap();
        skipped.transition_to(IngestState::DedupChecked).unwrap();
        skipped.transition_to(IngestState::Skipped).unwrap();
        assert!(skipped.state().is_terminal());

        let mut resumed = IngestTask::new("/data/c.mov", "fs-1");
        resumed.transition_to(IngestState::Checksummed).unwrap();
        resumed.transition_to(IngestState::Linking).unwrap();
    }

    #[test]
    fn test_invalid_transitions() {
        let mut task = IngestTask::new("/data/a.mov", "fs-1");
        assert!(task.transition_to(IngestState::Registering).is_err());
        assert!(task.transition_to(IngestState::Linked).is_err());

        task.transition_to(IngestState::Checksummed).unwrap();
        task.transition_to(IngestState::DedupChecked).unwrap();
        task.transition_to(IngestState::Skipped).unwrap();

        // Terminal states are final
        assert!(task.transition_to(IngestState::Registering).is_err());
        assert!(task.transition_to(IngestState::FailedFatal).is_err());
    }

    #[test]
    fn test_fail_classifies_error() {
        let mut task = IngestTask::new("/data/a.mov", "fs-1");
        task.transition_to(IngestState::Checksummed).unwrap();
        task.fail(&SyncError::TransientRemote {
            operation: "assets-find".to_string(),
            message: "503".to_string(),
        })
        .unwrap();
        assert_eq!(task.state(), IngestState::FailedRetryable);
        assert_eq!(task.outcome().unwrap().status, IngestStatus::FailedRetryable);

        let mut task = IngestTask::new("/data/a.mov", "fs-1");
        task.fail(&SyncError::Unreadable {
            path: "/data/a.mov".to_string(),
            message: "permission denied".to_string(),
        })
        .unwrap();
        let outcome = task.outcome().unwrap();
        assert_eq!(outcome.status, IngestStatus::FailedFatal);
        assert!(outcome.error.unwrap().contains("permission denied"));
    }

    #[test]
    fn test_outcome_requires_terminal_state() {
        let task = IngestTask::new("/data/a.mov", "fs-1");
        assert!(task.outcome().is_err());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            IngestState::Pending,
            IngestState::DedupChecked,
            IngestState::Registered,
            IngestState::FailedRetryable,
        ] {
            assert_eq!(state.as_str().parse::<IngestState>().unwrap(), state);
        }
        assert!("exploded".parse::<IngestState>().is_err());
        assert_eq!(IngestStatus::FailedFatal.to_string(), "FAILED_FATAL");
    }
}
