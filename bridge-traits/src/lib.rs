//! # Host Bridge Traits
//!
//! Capability contracts that the sync core requires from its surroundings.
//!
//! ## Overview
//!
//! The core never talks HTTP itself. The automation layer injects an object
//! implementing [`DamClient`](dam::DamClient), which wraps the DAM service's
//! collections, assets and storage endpoints together with authentication.
//!
//! ## Traits
//!
//! - [`DamClient`](dam::DamClient) - Collection lookup/create, asset lookup/create/link, storage settings
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Implementations should:
//!
//! - Report rate limiting, timeouts and server errors as `BridgeError::Transient`
//! - Report validation and authorization failures as `BridgeError::Rejected`
//! - Include the remote message so it can be surfaced per item
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so one client can be shared
//! across concurrent ingest tasks.

pub mod dam;
pub mod error;

pub use error::BridgeError;

pub use dam::{AssetRef, DamClient, Metadata, NewAsset, RemoteCollection, StorageSettings};
