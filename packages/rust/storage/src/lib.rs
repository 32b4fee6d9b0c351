//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding documents and their
//! generated artifacts, page-range segments, the lease-based task queue, the
//! knowledge base (concepts, relationships, content segments), and the
//! text-completion cache.
//!
//! **Access rules:**
//! - Pipeline and workers: read-write via [`Storage::open`]
//! - Inspection commands: read-only via [`Storage::open_readonly`]

mod cache;
mod documents;
mod knowledge;
mod migrations;
mod segments;
mod tasks;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use coursebuilder_shared::{CourseBuilderError, Result};
use libsql::{Connection, Database, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use cache::CacheKey;
pub use knowledge::StoredContentSegment;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CourseBuilderError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CourseBuilderError::not_found(
                "database",
                path.display().to_string(),
            ));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CourseBuilderError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CourseBuilderError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Column helpers shared by the table modules
// ---------------------------------------------------------------------------

pub(crate) fn db_err(e: libsql::Error) -> CourseBuilderError {
    CourseBuilderError::Storage(e.to_string())
}

/// Fixed-width UTC timestamp so stored values sort lexicographically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CourseBuilderError::Storage(format!("invalid timestamp {raw:?}: {e}")))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| CourseBuilderError::Storage(format!("serialize column: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| CourseBuilderError::Storage(format!("deserialize column: {e}")))
}

pub(crate) fn col_text(row: &Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(db_err)
}

/// Nullable text column.
pub(crate) fn col_opt_text(row: &Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

pub(crate) fn col_i64(row: &Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx).map_err(db_err)
}

pub(crate) fn col_f64(row: &Row, idx: i32) -> Result<f64> {
    row.get::<f64>(idx).map_err(db_err)
}

pub(crate) fn col_timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    parse_timestamp(&col_text(row, idx)?)
}

pub(crate) fn col_opt_timestamp(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    col_opt_text(row, idx)
        .map(|raw| parse_timestamp(&raw))
        .transpose()
}

pub(crate) fn col_opt_json<T: DeserializeOwned>(row: &Row, idx: i32) -> Result<Option<T>> {
    col_opt_text(row, idx).map(|raw| from_json(&raw)).transpose()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use coursebuilder_shared::Document;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    pub async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("cb_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    pub async fn seeded_document(storage: &Storage, page_count: u32) -> Document {
        let doc = Document::new("local", "Programlamaya Giriş", "/tmp/kitap.pdf", page_count);
        storage.insert_document(&doc).await.expect("insert document");
        doc
    }
}
