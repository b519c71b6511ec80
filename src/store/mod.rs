use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use futures_util::TryStreamExt;
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::Any;
use tracing::{debug, info, warn};

use crate::config::{self, Timeouts};
use crate::db::{bounded, Driver, Pool};
use crate::error::{StoreError, StoreResult};
use crate::models::{NewPaste, Paste, PasteSummary};

pub mod migrate;
pub mod replica;

use replica::{ReplicaCache, ShadowStore};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 100;

pub(crate) const PASTE_COLUMNS: &str = "id, title, body, syntax, create_time, delete_time, \
     one_use, author, author_email, author_url, is_file, file_name, mime_type, is_editable, \
     is_private, is_url, original_url";

const PASTE_VALUES: &str = "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

const UPDATE_PASTE: &str = "UPDATE pastes SET title = ?, body = ?, syntax = ?, delete_time = ?, \
     one_use = ?, author = ?, author_email = ?, author_url = ?, is_file = ?, file_name = ?, \
     mime_type = ?, is_editable = ?, is_private = ?, is_url = ?, original_url = ? WHERE id = ?";

const DELETE_PASTE: &str = "DELETE FROM pastes WHERE id = ?";

const DELETE_EXPIRED: &str = "DELETE FROM pastes WHERE delete_time > 0 AND delete_time < ?";

const LIST_PASTES: &str = "SELECT id, title, syntax, create_time, delete_time, author, is_file, \
     file_name, is_url FROM pastes WHERE is_private = ? AND (delete_time = 0 OR delete_time >= ?) \
     ORDER BY create_time DESC, id ASC LIMIT ? OFFSET ?";

pub(crate) fn insert_sql(verb: &str) -> String {
    format!("{verb} INTO pastes ({PASTE_COLUMNS}) VALUES ({PASTE_VALUES})")
}

pub(crate) fn select_by_id_sql() -> String {
    format!("SELECT {PASTE_COLUMNS} FROM pastes WHERE id = ?")
}

pub(crate) fn select_all_sql() -> String {
    format!("SELECT {PASTE_COLUMNS} FROM pastes ORDER BY create_time ASC, id ASC")
}

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

fn bind_insert<'q>(query: AnyQuery<'q>, paste: &'q Paste) -> AnyQuery<'q> {
    query
        .bind(paste.id.as_str())
        .bind(paste.title.as_str())
        .bind(paste.body.as_str())
        .bind(paste.syntax.as_str())
        .bind(paste.create_time)
        .bind(paste.delete_time)
        .bind(paste.one_use)
        .bind(paste.author.as_str())
        .bind(paste.author_email.as_str())
        .bind(paste.author_url.as_str())
        .bind(paste.is_file)
        .bind(paste.file_name.as_str())
        .bind(paste.mime_type.as_str())
        .bind(paste.is_editable)
        .bind(paste.is_private)
        .bind(paste.is_url)
        .bind(paste.original_url.as_str())
}

fn bind_update<'q>(query: AnyQuery<'q>, paste: &'q Paste) -> AnyQuery<'q> {
    query
        .bind(paste.title.as_str())
        .bind(paste.body.as_str())
        .bind(paste.syntax.as_str())
        .bind(paste.delete_time)
        .bind(paste.one_use)
        .bind(paste.author.as_str())
        .bind(paste.author_email.as_str())
        .bind(paste.author_url.as_str())
        .bind(paste.is_file)
        .bind(paste.file_name.as_str())
        .bind(paste.mime_type.as_str())
        .bind(paste.is_editable)
        .bind(paste.is_private)
        .bind(paste.is_url)
        .bind(paste.original_url.as_str())
        .bind(paste.id.as_str())
}

/// Insert a complete row, keeping its id and create time.
pub(crate) async fn insert_row(
    pool: &Pool,
    verb: &str,
    paste: &Paste,
    limit: Duration,
) -> StoreResult<()> {
    let sql = insert_sql(verb);
    let sql = pool.sql(&sql);
    let query = bind_insert(sqlx::query(&sql), paste);
    pool.execute_bounded("insert paste", limit, query).await?;
    Ok(())
}

pub(crate) async fn update_row(pool: &Pool, paste: &Paste, limit: Duration) -> StoreResult<u64> {
    let sql = pool.sql(UPDATE_PASTE);
    let query = bind_update(sqlx::query(&sql), paste);
    pool.execute_bounded("update paste", limit, query).await
}

pub(crate) async fn delete_row(pool: &Pool, id: &str, limit: Duration) -> StoreResult<u64> {
    let sql = pool.sql(DELETE_PASTE);
    let query = sqlx::query(&sql).bind(id);
    pool.execute_bounded("delete paste", limit, query).await
}

pub(crate) async fn delete_expired_rows(pool: &Pool, now: i64, limit: Duration) -> StoreResult<u64> {
    let sql = pool.sql(DELETE_EXPIRED);
    let query = sqlx::query(&sql).bind(now);
    pool.execute_bounded("delete expired pastes", limit, query).await
}

/// Clamp a requested page into the accepted range.
pub fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 || limit > MAX_LIST_LIMIT {
        DEFAULT_LIST_LIMIT
    } else {
        limit
    };
    (limit, offset.max(0))
}

fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Paste persistence over the primary backend, mirrored to a replica when
/// one is attached.
#[derive(Clone)]
pub struct PasteStore {
    primary: Pool,
    replica: Option<ReplicaCache>,
    timeouts: Timeouts,
}

impl PasteStore {
    /// Connect to the configured primary and prepare it for use.
    pub async fn open(config: &config::Database) -> StoreResult<Self> {
        let primary = Pool::connect(
            config.driver,
            &config.source,
            config.max_open_conns,
            config.max_idle_conns,
            config.timeouts.simple,
        )
        .await?;
        Self::from_pool(primary, &config.replica_path, config.timeouts).await
    }

    /// Initialize the schema on `primary`, provisioning a replica at
    /// `replica_path` unless the primary is itself SQLite.
    pub async fn from_pool(
        primary: Pool,
        replica_path: &Path,
        timeouts: Timeouts,
    ) -> StoreResult<Self> {
        primary.init_schema(timeouts.batch).await?;

        let replica = if primary.driver() == Driver::Sqlite {
            None
        } else {
            match ReplicaCache::provision(replica_path, timeouts).await {
                Ok(replica) => {
                    info!("mirroring pastes to {}", replica_path.display());
                    Some(replica)
                }
                Err(err) => {
                    warn!(
                        "could not provision replica at {}: {err}",
                        replica_path.display()
                    );
                    None
                }
            }
        };

        Ok(Self::with_replica(primary, replica, timeouts))
    }

    pub fn with_replica(primary: Pool, replica: Option<ReplicaCache>, timeouts: Timeouts) -> Self {
        PasteStore {
            primary,
            replica,
            timeouts,
        }
    }

    pub fn primary(&self) -> &Pool {
        &self.primary
    }

    #[cfg(test)]
    pub fn replica(&self) -> Option<&ReplicaCache> {
        self.replica.as_ref()
    }

    /// Give the replica a chance to catch up with the primary.
    pub async fn reconcile_replica(&self) {
        if let Some(replica) = &self.replica {
            if let Err(err) = replica.reconcile(&self.primary).await {
                warn!("replica reconciliation failed: {err}");
            }
        }
    }

    /// Store a new paste under a freshly generated id.
    pub async fn create(&self, new: NewPaste) -> StoreResult<Paste> {
        let paste = new.into_paste(generate_id(), now());
        insert_row(&self.primary, "INSERT", &paste, self.timeouts.simple).await?;

        debug!(id = %paste.id, "created paste");
        if let Some(replica) = &self.replica {
            contain("insert", &paste.id, replica.mirror_insert(&paste).await);
        }
        Ok(paste)
    }

    /// Copy every primary row into the replica, if one is attached.
    pub(crate) async fn mirror_all(&self) -> StoreResult<u64> {
        let Some(replica) = &self.replica else {
            return Ok(0);
        };
        let sql = select_all_sql();
        let sql = self.primary.sql(&sql);
        let mut rows = sqlx::query_as::<_, Paste>(&sql).fetch(self.primary.inner());
        let mut mirrored = 0;
        while let Some(paste) = rows
            .try_next()
            .await
            .map_err(|source| StoreError::database("read pastes", source))?
        {
            contain("insert", &paste.id, replica.mirror_insert(&paste).await);
            mirrored += 1;
        }
        Ok(mirrored)
    }

    /// Fetch a paste.
    ///
    /// Expired pastes are removed and reported as not found. One-use pastes
    /// are removed, and only the reader whose delete took effect gets the row.
    pub async fn get(&self, id: &str) -> StoreResult<Paste> {
        self.fetch(id, true).await
    }

    /// Fetch a paste without consuming it if it is one-use.
    ///
    /// Used to check policy flags before a write; never hand the result to a
    /// reader.
    pub async fn find(&self, id: &str) -> StoreResult<Paste> {
        self.fetch(id, false).await
    }

    async fn fetch(&self, id: &str, consume: bool) -> StoreResult<Paste> {
        let sql = select_by_id_sql();
        let sql = self.primary.sql(&sql);
        let query = sqlx::query_as::<_, Paste>(&sql)
            .bind(id)
            .fetch_optional(self.primary.inner());
        let paste = bounded("get paste", self.timeouts.simple, query)
            .await?
            .ok_or(StoreError::NotFound)?;

        if paste.is_expired_at(now()) {
            debug!(id, "paste expired, removing on read");
            self.remove(id).await?;
            return Err(StoreError::NotFound);
        }

        if consume && paste.one_use {
            if self.remove(id).await? == 0 {
                // a concurrent reader already consumed it
                return Err(StoreError::NotFound);
            }
            debug!(id, "one-use paste consumed");
        }

        Ok(paste)
    }

    /// Replace every mutable column of the paste with the same id.
    pub async fn update(&self, paste: &Paste) -> StoreResult<()> {
        if update_row(&self.primary, paste, self.timeouts.simple).await? == 0 {
            return Err(StoreError::NotFound);
        }
        if let Some(replica) = &self.replica {
            contain("update", &paste.id, replica.mirror_update(paste).await);
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        if self.remove(id).await? == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<u64> {
        let removed = delete_row(&self.primary, id, self.timeouts.simple).await?;
        if removed > 0 {
            if let Some(replica) = &self.replica {
                contain("delete", id, replica.mirror_delete(id).await);
            }
        }
        Ok(removed)
    }

    /// Remove every paste whose delete time has passed.
    pub async fn delete_expired(&self) -> StoreResult<u64> {
        let now = now();
        let removed = delete_expired_rows(&self.primary, now, self.timeouts.batch).await?;
        if let Some(replica) = &self.replica {
            if let Err(err) = replica.mirror_delete_expired(now).await {
                warn!("replica expiry sweep failed: {err}");
            }
        }
        Ok(removed)
    }

    /// List public, unexpired pastes, newest first.
    pub async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<PasteSummary>> {
        let (limit, offset) = clamp_page(limit, offset);
        let sql = self.primary.sql(LIST_PASTES);
        let query = sqlx::query_as::<_, PasteSummary>(&sql)
            .bind(false)
            .bind(now())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.primary.inner());
        bounded("list pastes", self.timeouts.list, query).await
    }

    /// Total rows on the primary, expired or not.
    pub async fn count(&self) -> StoreResult<u64> {
        let query = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pastes")
            .fetch_one(self.primary.inner());
        let count = bounded("count pastes", self.timeouts.simple, query).await?;
        Ok(count.max(0) as u64)
    }
}

fn contain(op: &str, id: &str, result: StoreResult<()>) {
    if let Err(err) = result {
        warn!(id, "replica {op} failed: {err}");
    }
}
