use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use sqlx::any::{AnyPoolOptions, AnyQueryResult};
use sqlx::AnyPool;
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Backend a pool talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Postgres,
    Mysql,
    Sqlite,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Driver::Postgres => "postgres",
            Driver::Mysql => "mysql",
            Driver::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

impl Driver {
    /// Turn a configured source into a URL sqlx understands.
    ///
    /// SQLite sources may be bare file paths; they are created if missing.
    pub fn connection_url(&self, source: &str) -> String {
        match self {
            Driver::Sqlite if !source.starts_with("sqlite:") => {
                format!("sqlite://{source}?mode=rwc")
            }
            _ => source.to_owned(),
        }
    }

    fn schema(&self) -> &'static [&'static str] {
        match self {
            Driver::Postgres => POSTGRES_SCHEMA,
            Driver::Mysql => MYSQL_SCHEMA,
            Driver::Sqlite => SQLITE_SCHEMA,
        }
    }
}

const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pastes (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL DEFAULT '',
        body TEXT NOT NULL DEFAULT '',
        syntax TEXT NOT NULL DEFAULT '',
        create_time INTEGER NOT NULL,
        delete_time INTEGER NOT NULL DEFAULT 0,
        one_use BOOLEAN NOT NULL DEFAULT 0,
        author TEXT NOT NULL DEFAULT '',
        author_email TEXT NOT NULL DEFAULT '',
        author_url TEXT NOT NULL DEFAULT '',
        is_file BOOLEAN NOT NULL DEFAULT 0,
        file_name TEXT NOT NULL DEFAULT '',
        mime_type TEXT NOT NULL DEFAULT '',
        is_editable BOOLEAN NOT NULL DEFAULT 0,
        is_private BOOLEAN NOT NULL DEFAULT 0,
        is_url BOOLEAN NOT NULL DEFAULT 0,
        original_url TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_pastes_delete_time ON pastes (delete_time)",
    "CREATE INDEX IF NOT EXISTS idx_pastes_create_time ON pastes (create_time)",
];

const POSTGRES_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pastes (
        id VARCHAR(16) PRIMARY KEY,
        title TEXT NOT NULL DEFAULT '',
        body TEXT NOT NULL DEFAULT '',
        syntax TEXT NOT NULL DEFAULT '',
        create_time BIGINT NOT NULL,
        delete_time BIGINT NOT NULL DEFAULT 0,
        one_use BOOLEAN NOT NULL DEFAULT FALSE,
        author TEXT NOT NULL DEFAULT '',
        author_email TEXT NOT NULL DEFAULT '',
        author_url TEXT NOT NULL DEFAULT '',
        is_file BOOLEAN NOT NULL DEFAULT FALSE,
        file_name TEXT NOT NULL DEFAULT '',
        mime_type TEXT NOT NULL DEFAULT '',
        is_editable BOOLEAN NOT NULL DEFAULT FALSE,
        is_private BOOLEAN NOT NULL DEFAULT FALSE,
        is_url BOOLEAN NOT NULL DEFAULT FALSE,
        original_url TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_pastes_delete_time ON pastes (delete_time)",
    "CREATE INDEX IF NOT EXISTS idx_pastes_create_time ON pastes (create_time)",
];

// MySQL can't put a default on TEXT columns and has no CREATE INDEX IF NOT
// EXISTS, so the indexes live in the table definition.
const MYSQL_SCHEMA: &[&str] = &["CREATE TABLE IF NOT EXISTS pastes (
        id VARCHAR(16) PRIMARY KEY,
        title TEXT NOT NULL,
        body LONGTEXT NOT NULL,
        syntax VARCHAR(64) NOT NULL DEFAULT '',
        create_time BIGINT NOT NULL,
        delete_time BIGINT NOT NULL DEFAULT 0,
        one_use BOOLEAN NOT NULL DEFAULT FALSE,
        author TEXT NOT NULL,
        author_email TEXT NOT NULL,
        author_url TEXT NOT NULL,
        is_file BOOLEAN NOT NULL DEFAULT FALSE,
        file_name TEXT NOT NULL,
        mime_type VARCHAR(255) NOT NULL DEFAULT '',
        is_editable BOOLEAN NOT NULL DEFAULT FALSE,
        is_private BOOLEAN NOT NULL DEFAULT FALSE,
        is_url BOOLEAN NOT NULL DEFAULT FALSE,
        original_url TEXT NOT NULL,
        INDEX idx_pastes_delete_time (delete_time),
        INDEX idx_pastes_create_time (create_time)
    ) CHARACTER SET utf8mb4"];

/// Connection pool for one backend.
#[derive(Clone)]
pub struct Pool {
    pool: AnyPool,
    driver: Driver,
}

impl Pool {
    /// Connect to a backend.
    ///
    /// `max_idle` connections are kept open even when the pool is quiet.
    pub async fn connect(
        driver: Driver,
        source: &str,
        max_open: u32,
        max_idle: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let max_open = max_open.max(1);
        let pool = AnyPoolOptions::new()
            .max_connections(max_open)
            .min_connections(max_idle.min(max_open))
            .acquire_timeout(acquire_timeout)
            .connect(&driver.connection_url(source))
            .await
            .map_err(|source| StoreError::database("connect", source))?;

        info!("connected to {driver} database");
        Ok(Pool { pool, driver })
    }

    /// Open (creating if needed) a SQLite file with a small pool.
    pub async fn open_sqlite(path: &Path, acquire_timeout: Duration) -> StoreResult<Self> {
        let source = path.to_string_lossy();
        Self::connect(Driver::Sqlite, &source, 4, 1, acquire_timeout).await
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn inner(&self) -> &AnyPool {
        &self.pool
    }

    /// Create the `pastes` table and its indexes if they do not exist.
    pub async fn init_schema(&self, limit: Duration) -> StoreResult<()> {
        for statement in self.driver.schema() {
            let query = sqlx::query(statement).execute(&self.pool);
            bounded("init schema", limit, query).await?;
        }
        Ok(())
    }

    /// Rewrite `?` placeholders into the backend's dialect.
    ///
    /// Every `?` in `query` is taken to be a placeholder.
    pub fn sql<'q>(&self, query: &'q str) -> Cow<'q, str> {
        match self.driver {
            Driver::Postgres => {
                let mut out = String::with_capacity(query.len() + 16);
                let mut n = 0;
                for c in query.chars() {
                    if c == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(c);
                    }
                }
                Cow::Owned(out)
            }
            Driver::Mysql | Driver::Sqlite => Cow::Borrowed(query),
        }
    }

    /// Run a statement and report how many rows it touched.
    pub async fn execute_bounded<'q>(
        &self,
        op: &'static str,
        limit: Duration,
        query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    ) -> StoreResult<u64> {
        let result: AnyQueryResult = bounded(op, limit, query.execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Await a database future under a deadline.
pub async fn bounded<T, F>(op: &'static str, limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|source| StoreError::database(op, source)),
        Err(_) => Err(StoreError::deadline(op, limit)),
    }
}
