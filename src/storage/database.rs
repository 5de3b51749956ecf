//! Asynchronous storage medium backed by an embedded SQLite database.

use std::path::{Path, PathBuf};

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::BusError;
use crate::job::{is_job_collection, Job, StoredJob};

use super::DATABASE_VERSION;

/// The asynchronous database medium.
///
/// Records live in a `jobs` table keyed by an auto-incrementing `job_id`;
/// the record itself is stored as JSON text. One connection is opened on
/// first use and memoized for the lifetime of the store.
#[derive(Debug)]
pub struct DatabaseStore {
    path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
}

impl DatabaseStore {
    /// Create a store over the database file at `path`. The connection is
    /// opened lazily on first use.
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            pool: Mutex::new(None),
        }
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate every stored record, oldest first, together with
    /// its store-assigned `job_id`.
    ///
    /// Validation mirrors the synchronous mediums: the whole read degrades
    /// to an empty vector when any record is malformed. Connection and query
    /// failures are availability problems, not corruption, and propagate.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Database`] when the database cannot be opened or
    /// queried.
    pub async fn jobs(&self) -> Result<Vec<StoredJob>, BusError> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT job_id, record FROM jobs ORDER BY job_id ASC")
            .fetch_all(&pool)
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: i64 = row.try_get("job_id")?;
            let record: String = row.try_get("record")?;
            let Ok(value) = serde_json::from_str::<Value>(&record) else {
                warn!(job_id, "Stored record is not JSON, treating database as empty");
                return Ok(Vec::new());
            };
            ids.push(job_id);
            records.push(value);
        }

        // Same gate as the slot mediums: the whole collection is validated
        // before any job re-enters the registry.
        let collection = Value::Array(records);
        if !is_job_collection(&collection) {
            warn!("Stored records failed validation, treating database as empty");
            return Ok(Vec::new());
        }
        let Ok(jobs) = serde_json::from_value::<Vec<Job>>(collection) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .into_iter()
            .zip(jobs)
            .map(|(job_id, job)| StoredJob { job_id, job })
            .collect())
    }

    /// Insert one job record and return its assigned `job_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Database`] on connection or insert failure and
    /// [`BusError::Json`] if the record cannot be serialized.
    pub async fn insert(&self, job: &Job) -> Result<i64, BusError> {
        let pool = self.pool().await?;
        let record = serde_json::to_string(job)?;
        let result = sqlx::query("INSERT INTO jobs (record) VALUES (?1)")
            .bind(record)
            .execute(&pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Delete the record stored under `job_id`. Deleting an absent id is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Database`] on connection or delete failure.
    pub async fn delete(&self, job_id: i64) -> Result<(), BusError> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .execute(&pool)
            .await?;
        Ok(())
    }

    // Open the pool on first use and memoize it; later calls reuse the same
    // connection.
    async fn pool(&self) -> Result<SqlitePool, BusError> {
        let mut slot = self.pool.lock().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        migrate(&pool).await?;

        *slot = Some(pool.clone());
        Ok(pool)
    }
}

// A fresh file reports user_version 0; create the schema and stamp the
// current version. A file already at the current version is left untouched.
async fn migrate(pool: &SqlitePool) -> Result<(), BusError> {
    let row = sqlx::query("PRAGMA user_version").fetch_one(pool).await?;
    let version: i32 = row.try_get(0)?;
    if version == DATABASE_VERSION {
        return Ok(());
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id  INTEGER PRIMARY KEY AUTOINCREMENT,
            record  TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(&format!("PRAGMA user_version = {DATABASE_VERSION}"))
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
