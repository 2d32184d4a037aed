//! SQLite persistence for Ratchet.
//!
//! One database file holds every table the execution core touches: agents,
//! tasks, projects, tool policies, transcripts, approvals, human requests
//! and memory entries (with an FTS5 index). The pool is limited to a single
//! connection so every write is serialized.

pub mod agents;
pub mod projects;
mod schema;
pub mod tasks;
pub mod time;

use std::path::Path;
use std::str::FromStr;

use ratchet_core::error::StoreError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info};

pub use projects::ToolPolicyRow;
pub use time::{format_ts, now_ts, parse_ts};

/// Map a sqlx error into a [`StoreError`] with context.
pub fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Database(format!("{context}: {e}"))
}

/// Shared handle to the database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Database(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let db = Self::connect_with(options).await?;
        info!("SQLite database initialized at {}", path.display());
        Ok(db)
    }

    /// A private in-process database, for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err("in-memory options"))?;
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        // A single connection that never idles out: an in-memory database
        // lives exactly as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err("opening SQLite"))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Wrap an existing pool; migrations are applied.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for (label, statement) in schema::MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
        }
        debug!("SQLite migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
