//! Workspace facade crate.
//!
//! Re-exports the workspace crates so automation layers can depend on
//! `dam-sync-workspace` alone. The `sync` feature (on by default) pulls in the
//! directory mapper and ingest engine from `core-sync`.

pub use bridge_traits;
pub use core_runtime;

#[cfg(feature = "sync")]
pub use core_sync;
