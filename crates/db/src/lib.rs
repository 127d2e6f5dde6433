use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use thiserror::Error;

pub mod models;
pub mod retry;
pub mod store;
pub mod types;
pub mod validation;

pub use retry::{RetryPolicy, with_store_retry};
pub use store::{MetadataStore, TaskStore};
pub use types::{TaskPriority, TaskStatus};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl DbError {
    /// True when sqlite reported the database as locked or busy.
    pub fn is_busy(&self) -> bool {
        let DbError::Sqlx(err) = self else {
            return false;
        };
        let Some(db_err) = err.as_database_error() else {
            return matches!(err, sqlx::Error::PoolTimedOut);
        };

        if let Some(code) = db_err.code()
            && (code == "5" || code == "6")
        {
            return true;
        }

        let message = db_err.message();
        message.contains("database is locked") || message.contains("database is busy")
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        uuid TEXT PRIMARY KEY NOT NULL,
        legacy_key TEXT,
        sort_order INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_legacy_key ON tasks (legacy_key)",
    "CREATE TABLE IF NOT EXISTS bot_metadata (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

#[derive(Clone)]
pub struct DBService {
    pub pool: DbPool,
}

impl DBService {
    pub async fn new(database_path: &Path) -> Result<DBService, DbError> {
        if let Some(parent) = database_path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            tracing::warn!(path = %parent.display(), error = %err, "Failed to create database directory");
        }

        let database_url = format!("sqlite://{}", database_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        init_schema(&pool).await?;
        tracing::debug!(path = %database_path.display(), "Opened task database");
        Ok(DBService { pool })
    }

    /// Single-connection in-memory database. The connection is pinned for the
    /// pool's lifetime because sqlite drops the data when it closes.
    pub async fn new_in_memory() -> Result<DBService, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        init_schema(&pool).await?;
        Ok(DBService { pool })
    }
}

async fn init_schema(pool: &DbPool) -> Result<(), DbError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
