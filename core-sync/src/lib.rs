//! # Directory Mapping & Resumable Ingest
//!
//! Mirrors a filesystem hierarchy as DAM collections and registers files as
//! assets with idempotent, resumable retry semantics.
//!
//! ## Overview
//!
//! This crate owns all the stateful logic of a sync run:
//! - Turning filesystem paths into collection paths below a mapping root
//! - Creating missing collections ancestor-first, at most once per prefix
//! - Fingerprinting files and deduplicating against existing assets
//! - Driving each file through the ingest state machine under a bounded
//!   retry policy, with a resume log for interrupted registrations
//!
//! ## Components
//!
//! - **Path Normalizer** (`path`): Absolute path → [`PathSegments`]
//! - **Collection Cache** (`collection_cache`): Single-flight, ancestor-first collection resolution
//! - **Directory Mapper** (`mapper`): Walks a tree and maps every directory, isolating failed subtrees
//! - **Checksum Index** (`checksum`): SHA-256 fingerprints and dedup lookups
//! - **Ingest Engine** (`ingest`): Per-file state flow from checksum to collection link
//! - **Ingest Task** (`task`): State machine with validated transitions
//! - **Retry Policy** (`retry`): Exponential backoff with per-call timeouts
//! - **Repository** (`repository`): Resume log and durable collection store on SQLite
//! - **Scan Filters** (`filters`) and **Sidecars** (`sidecar`): Per-file include/ignore rules and metadata
//! - **Ingest Coordinator** (`coordinator`): Entry points and run scoping

pub mod checksum;
pub mod collection_cache;
pub mod coordinator;
pub mod error;
pub mod filters;
pub mod ingest;
pub mod mapper;
pub mod path;
pub mod repository;
pub mod retry;
pub mod sidecar;
pub mod task;

pub use checksum::{fingerprint, ChecksumIndex};
pub use collection_cache::{
    CollectionCache, CollectionRef, CollectionStore, InMemoryCollectionStore,
};
pub use coordinator::{BatchItem, BatchReport, IngestCoordinator};
pub use error::{Result, SyncError};
pub use filters::ScanFilter;
pub use ingest::{IngestEngine, IngestOptions, IngestRun};
pub use mapper::{DirectoryMapper, MappingError, MappingReport, MappingRoot};
pub use path::{normalize, PathSegments};
pub use repository::{
    InMemoryResumeLog, ResumeEntry, ResumeLog, SqliteCollectionStore, SqliteResumeLog,
};
pub use retry::RetryPolicy;
pub use task::{IngestOutcome, IngestState, IngestStatus, IngestTask, IngestTaskId};
