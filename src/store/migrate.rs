//! Copy every paste from one backend to another.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::TryStreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{self, Timeouts};
use crate::db::{bounded, Driver, Pool};
use crate::error::StoreError;
use crate::models::Paste;

use super::{bind_insert, insert_sql, select_all_sql, PasteStore};

/// How often progress is reported, in rows.
const PROGRESS_EVERY: u64 = 100;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("source and destination are the same {0} database")]
    SameBackend(Driver),
    #[error("failed to open {role} database")]
    Open {
        role: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("failed to read pastes from source")]
    Read {
        #[source]
        source: StoreError,
    },
    #[error("failed to copy paste {id}")]
    Insert {
        id: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to commit migrated pastes")]
    Commit {
        #[source]
        source: StoreError,
    },
    #[error("migration did not finish within {0:?}, nothing was copied")]
    TimedOut(Duration),
}

/// One end of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub driver: Driver,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    /// Mirror file for the destination when it is not SQLite.
    pub replica_path: PathBuf,
    pub timeouts: Timeouts,
}

impl From<&config::Database> for MigrateOptions {
    fn from(config: &config::Database) -> Self {
        MigrateOptions {
            max_open_conns: config.max_open_conns,
            max_idle_conns: config.max_idle_conns,
            replica_path: config.replica_path.clone(),
            timeouts: config.timeouts,
        }
    }
}

fn open_error(role: &'static str) -> impl FnOnce(StoreError) -> MigrationError {
    move |source| MigrationError::Open { role, source }
}

/// Copy all pastes from `src` into a freshly initialized `dst`.
///
/// Rows are written in a single destination transaction: the first row that
/// fails to copy aborts the migration and leaves the destination as it was.
/// `progress` is called with the running row count every hundred rows.
/// Returns the rows copied.
pub async fn migrate(
    src: &Backend,
    dst: &Backend,
    options: &MigrateOptions,
    mut progress: impl FnMut(u64),
) -> Result<u64, MigrationError> {
    if src == dst {
        return Err(MigrationError::SameBackend(src.driver));
    }
    let timeouts = options.timeouts;

    let dst_pool = Pool::connect(
        dst.driver,
        &dst.source,
        options.max_open_conns,
        options.max_idle_conns,
        timeouts.simple,
    )
    .await
    .map_err(open_error("destination"))?;
    let destination = PasteStore::from_pool(dst_pool, &options.replica_path, timeouts)
        .await
        .map_err(open_error("destination"))?;

    let source = Pool::connect(
        src.driver,
        &src.source,
        options.max_open_conns,
        options.max_idle_conns,
        timeouts.simple,
    )
    .await
    .map_err(open_error("source"))?;

    info!("migrating pastes from {} to {}", src.driver, dst.driver);

    let select = select_all_sql();
    let select = source.sql(&select);
    let insert = insert_sql("INSERT");
    let insert = destination.primary().sql(&insert);
    let copy = async {
        let mut tx = destination
            .primary()
            .inner()
            .begin()
            .await
            .map_err(|source| MigrationError::Commit {
                source: StoreError::database("begin migration", source),
            })?;

        let mut rows = sqlx::query_as::<_, Paste>(&select).fetch(source.inner());
        let mut copied = 0;
        while let Some(paste) = rows.try_next().await.map_err(|source| MigrationError::Read {
            source: StoreError::database("read source pastes", source),
        })? {
            let query = bind_insert(sqlx::query(&insert), &paste);
            bounded("insert paste", timeouts.simple, query.execute(&mut *tx))
                .await
                .map_err(|source| MigrationError::Insert {
                    id: paste.id.clone(),
                    source,
                })?;
            copied += 1;
            if copied % PROGRESS_EVERY == 0 {
                debug!("migrated {copied} pastes");
                progress(copied);
            }
        }

        tx.commit().await.map_err(|source| MigrationError::Commit {
            source: StoreError::database("commit migration", source),
        })?;
        Ok::<_, MigrationError>(copied)
    };

    // an unfinished transaction rolls back when the copy is dropped
    let copied = tokio::time::timeout(timeouts.migration, copy)
        .await
        .map_err(|_| MigrationError::TimedOut(timeouts.migration))??;
    source.close().await;

    match destination.mirror_all().await {
        Ok(mirrored) if mirrored > 0 => info!("mirrored {mirrored} migrated pastes to replica"),
        Ok(_) => {}
        Err(err) => warn!("failed to mirror migrated pastes: {err}"),
    }
    destination.primary().close().await;

    info!("migration complete: {copied} pastes");
    Ok(copied)
}
