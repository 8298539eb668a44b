//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync core:
//! - Logging and tracing infrastructure
//! - Configuration management
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the mapping and ingest
//! engines depend on. It establishes the logging conventions and the
//! validated configuration surface used throughout the system.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{IngestConfig, IngestConfigBuilder, MountMapping};
pub use error::{Error, Result};
