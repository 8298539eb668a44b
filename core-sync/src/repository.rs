//! # Resume Log & Collection Store Persistence
//!
//! Durable backends for the two pieces of state that may outlive a run.
//!
//! ## Overview
//!
//! - [`ResumeLog`] remembers tasks that registered an asset but did not finish
//!   linking, and tasks that failed, so a re-submitted file picks up where it
//!   stopped instead of creating a second asset.
//! - [`SqliteCollectionStore`] keeps path-to-collection mappings across runs
//!   behind the [`CollectionStore`] trait.
//!
//! In-memory implementations are the defaults; the SQLite ones are selected
//! when a database path is configured.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::collection_cache::{CollectionRef, CollectionStore};
use crate::path::PathSegments;
use crate::task::IngestState;
use crate::{Result, SyncError};

// ============================================================================
// Resume Log
// ============================================================================

/// Progress of one source file that has not reached a successful end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeEntry {
    pub source_path: String,
    pub storage_id: String,
    pub checksum: Option<String>,
    /// Set once registration succeeded
    pub asset_id: Option<String>,
    pub state: IngestState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ResumeEntry {
    /// Whether this entry lets a task with `checksum` skip straight to linking
    pub fn resumable_with(&self, checksum: &str, storage_id: &str) -> Option<&str> {
        if self.storage_id == storage_id && self.checksum.as_deref() == Some(checksum) {
            self.asset_id.as_deref()
        } else {
            None
        }
    }
}

/// Per-file resume markers, keyed by source path
#[async_trait]
pub trait ResumeLog: Send + Sync {
    async fn load(&self, source_path: &str) -> Result<Option<ResumeEntry>>;

    /// Insert or replace the entry for its source path
    async fn record(&self, entry: &ResumeEntry) -> Result<()>;

    async fn remove(&self, source_path: &str) -> Result<()>;

    /// Entries not yet resolved, oldest first
    async fn pending(&self) -> Result<Vec<ResumeEntry>>;
}

#[derive(Default)]
pub struct InMemoryResumeLog {
    entries: RwLock<HashMap<String, ResumeEntry>>,
}

impl InMemoryResumeLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResumeLog for InMemoryResumeLog {
    async fn load(&self, source_path: &str) -> Result<Option<ResumeEntry>> {
        Ok(self.entries.read().await.get(source_path).cloned())
    }

    async fn record(&self, entry: &ResumeEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.source_path.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, source_path: &str) -> Result<()> {
        self.entries.write().await.remove(source_path);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<ResumeEntry>> {
        let mut entries: Vec<ResumeEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.source_path.cmp(&b.source_path))
        });
        Ok(entries)
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// Open (creating if needed) a SQLite database and its tables
pub async fn connect_sqlite(path: &str) -> Result<SqlitePool> {
    info!(database = %path, "Opening sync state database");

    let options = SqliteConnectOptions::from_str(path)
        .map_err(|e| SyncError::Database(e.to_string()))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Create the resume log and collection cache tables
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_resume_log (
            source_path TEXT PRIMARY KEY NOT NULL,
            storage_id TEXT NOT NULL,
            checksum TEXT,
            asset_id TEXT,
            state TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| SyncError::Database(e.to_string()))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_cache (
            scope TEXT NOT NULL,
            segments TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            parent_id TEXT,
            PRIMARY KEY (scope, segments)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| SyncError::Database(e.to_string()))?;

    debug!("Sync state tables ready");
    Ok(())
}

/// SQLite implementation of ResumeLog
pub struct SqliteResumeLog {
    pool: SqlitePool,
}

impl SqliteResumeLog {
    /// Wrap a pool whose schema was created with [`migrate`]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path` and prepare its tables
    pub async fn open(path: &str) -> Result<Self> {
        Ok(Self::new(connect_sqlite(path).await?))
    }
}

#[derive(Debug, FromRow)]
struct ResumeRow {
    source_path: String,
    storage_id: String,
    checksum: Option<String>,
    asset_id: Option<String>,
    state: String,
    attempts: i64,
    last_error: Option<String>,
    updated_at: i64,
}

impl TryFrom<ResumeRow> for ResumeEntry {
    type Error = SyncError;

    fn try_from(row: ResumeRow) -> Result<Self> {
        let updated_at = Utc
            .timestamp_opt(row.updated_at, 0)
            .single()
            .ok_or_else(|| SyncError::Database(format!("Invalid timestamp: {}", row.updated_at)))?;

        Ok(Self {
            source_path: row.source_path,
            storage_id: row.storage_id,
            checksum: row.checksum,
            asset_id: row.asset_id,
            state: IngestState::from_str(&row.state)?,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            last_error: row.last_error,
            updated_at,
        })
    }
}

#[async_trait]
impl ResumeLog for SqliteResumeLog {
    async fn load(&self, source_path: &str) -> Result<Option<ResumeEntry>> {
        let row = sqlx::query_as::<_, ResumeRow>(
            r#"
            SELECT source_path, storage_id, checksum, asset_id,
                   state, attempts, last_error, updated_at
            FROM ingest_resume_log
            WHERE source_path = ?
            "#,
        )
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(ResumeEntry::try_from).transpose()
    }

    async fn record(&self, entry: &ResumeEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_resume_log (
                source_path, storage_id, checksum, asset_id,
                state, attempts, last_error, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_path) DO UPDATE SET
                storage_id = excluded.storage_id,
                checksum = excluded.checksum,
                asset_id = excluded.asset_id,
                state = excluded.state,
                attempts = excluded.attempts,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.source_path)
        .bind(&entry.storage_id)
        .bind(&entry.checksum)
        .bind(&entry.asset_id)
        .bind(entry.state.as_str())
        .bind(entry.attempts as i64)
        .bind(&entry.last_error)
        .bind(entry.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, source_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM ingest_resume_log WHERE source_path = ?")
            .bind(source_path)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn pending(&self) -> Result<Vec<ResumeEntry>> {
        let rows = sqlx::query_as::<_, ResumeRow>(
            r#"
            SELECT source_path, storage_id, checksum, asset_id,
                   state, attempts, last_error, updated_at
            FROM ingest_resume_log
            ORDER BY updated_at ASC, source_path ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(ResumeEntry::try_from).collect()
    }
}

// ============================================================================
// Collection Store
// ============================================================================

/// Durable [`CollectionStore`] for multi-run mapping
pub struct SqliteCollectionStore {
    pool: SqlitePool,
}

impl SqliteCollectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (and migrate) the database at `path`
    pub async fn open(path: &str) -> Result<Self> {
        Ok(Self::new(connect_sqlite(path).await?))
    }
}

#[derive(Debug, FromRow)]
struct CollectionRow {
    segments: String,
    remote_id: String,
    parent_id: Option<String>,
}

impl TryFrom<CollectionRow> for CollectionRef {
    type Error = SyncError;

    fn try_from(row: CollectionRow) -> Result<Self> {
        Ok(Self {
            remote_id: row.remote_id,
            segments: PathSegments::new(row.segments.split('/'))?,
            parent_id: row.parent_id,
        })
    }
}

#[async_trait]
impl CollectionStore for SqliteCollectionStore {
    async fn get(&self, scope: &str, segments: &PathSegments) -> Result<Option<CollectionRef>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            "SELECT segments, remote_id, parent_id FROM collection_cache WHERE scope = ? AND segments = ?",
        )
        .bind(scope)
        .bind(segments.join())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(CollectionRef::try_from).transpose()
    }

    async fn put(&self, scope: &str, collection: &CollectionRef) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO collection_cache (scope, segments, remote_id, parent_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(scope, segments) DO UPDATE SET
                remote_id = excluded.remote_id,
                parent_id = excluded.parent_id
            "#,
        )
        .bind(scope)
        .bind(collection.segments.join())
        .bind(&collection.remote_id)
        .bind(&collection.parent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self, scope: &str) -> Result<()> {
        sqlx::query("DELETE FROM collection_cache WHERE scope = ?")
            .bind(scope)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn len(&self, scope: &str) -> Result<usize> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM collection_cache WHERE scope = ?")
                .bind(scope)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count.max(0) as usize)
    }
}

// ============================================================================
// Tests
// ============================================================================
