//! Best-effort SQLite mirror of the primary `pastes` table.
//!
//! The mirror exists so that a single-file copy is enough to restore pastes
//! without the primary database engine. It is never read to serve traffic and
//! may lag the primary: writes are attempted after the primary commits, and
//! a crash in between leaves that row stale.

use std::path::Path;

use crate::config::Timeouts;
use crate::db::Pool;
use crate::error::StoreResult;
use crate::models::Paste;

use super::{delete_expired_rows, delete_row, insert_row, update_row};

/// An eventually consistent shadow of the primary store.
///
/// Implementations receive every successful primary write; their errors are
/// reported to the caller only so it can log them.
#[allow(async_fn_in_trait)]
pub trait ShadowStore {
    async fn mirror_insert(&self, paste: &Paste) -> StoreResult<()>;

    async fn mirror_update(&self, paste: &Paste) -> StoreResult<()>;

    async fn mirror_delete(&self, id: &str) -> StoreResult<()>;

    async fn mirror_delete_expired(&self, now: i64) -> StoreResult<u64>;

    /// Bring the shadow back in line with the primary.
    ///
    /// Does nothing: rows missed by a failed mirror write stay missing until
    /// they are written again.
    async fn reconcile(&self, _primary: &Pool) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct ReplicaCache {
    pool: Pool,
    timeouts: Timeouts,
}

impl ReplicaCache {
    /// Open the mirror file, creating it and its schema if needed.
    pub async fn provision(path: &Path, timeouts: Timeouts) -> StoreResult<Self> {
        let pool = Pool::open_sqlite(path, timeouts.simple).await?;
        pool.init_schema(timeouts.batch).await?;
        Ok(ReplicaCache { pool, timeouts })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl ShadowStore for ReplicaCache {
    async fn mirror_insert(&self, paste: &Paste) -> StoreResult<()> {
        // a stale mirror can already hold the id
        insert_row(&self.pool, "INSERT OR REPLACE", paste, self.timeouts.simple).await
    }

    async fn mirror_update(&self, paste: &Paste) -> StoreResult<()> {
        if update_row(&self.pool, paste, self.timeouts.simple).await? == 0 {
            tracing::debug!(id = %paste.id, "replica missing updated paste, inserting");
            insert_row(&self.pool, "INSERT OR REPLACE", paste, self.timeouts.simple).await?;
        }
        Ok(())
    }

    async fn mirror_delete(&self, id: &str) -> StoreResult<()> {
        delete_row(&self.pool, id, self.timeouts.simple).await?;
        Ok(())
    }

    async fn mirror_delete_expired(&self, now: i64) -> StoreResult<u64> {
        delete_expired_rows(&self.pool, now, self.timeouts.batch).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::NewPaste;
    use crate::store::tests::rows_with_id;
    use crate::store::PasteStore;

    async fn mirrored_store(dir: &tempfile::TempDir) -> PasteStore {
        let timeouts = Timeouts::default();
        let primary = Pool::open_sqlite(&dir.path().join("primary.db"), Duration::from_secs(5))
            .await
            .unwrap();
        primary.init_schema(timeouts.batch).await.unwrap();
        let replica = ReplicaCache::provision(&dir.path().join("backup.db"), timeouts)
            .await
            .unwrap();
        PasteStore::with_replica(primary, Some(replica), timeouts)
    }

    #[tokio::test]
    async fn writes_are_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let store = mirrored_store(&dir).await;
        let replica = store.replica().unwrap().pool().clone();

        let mut paste = store
            .create(NewPaste {
                title: "mirrored".to_owned(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows_with_id(&replica, &paste.id).await, 1);

        paste.title = "changed".to_owned();
        store.update(&paste).await.unwrap();
        let title: String = sqlx::query_scalar("SELECT title FROM pastes WHERE id = ?")
            .bind(paste.id.as_str())
            .fetch_one(replica.inner())
            .await
            .unwrap();
        assert_eq!(title, "changed");

        store.delete(&paste.id).await.unwrap();
        assert_eq!(rows_with_id(&replica, &paste.id).await, 0);
    }

    #[tokio::test]
    async fn expiry_is_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let store = mirrored_store(&dir).await;
        let replica = store.replica().unwrap().pool().clone();

        let expired = store
            .create(NewPaste {
                delete_time: chrono::Utc::now().timestamp() - 30,
                ..Default::default()
            })
            .await
            .unwrap();
        let kept = store.create(NewPaste::default()).await.unwrap();

        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert_eq!(rows_with_id(&replica, &expired.id).await, 0);
        assert_eq!(rows_with_id(&replica, &kept.id).await, 1);
    }

    #[tokio::test]
    async fn update_restores_row_missing_from_replica() {
        let dir = tempfile::tempdir().unwrap();
        let store = mirrored_store(&dir).await;
        let replica = store.replica().unwrap().pool().clone();

        let paste = store.create(NewPaste::default()).await.unwrap();
        sqlx::query("DELETE FROM pastes")
            .execute(replica.inner())
            .await
            .unwrap();

        store.update(&paste).await.unwrap();
        assert_eq!(rows_with_id(&replica, &paste.id).await, 1);
    }

    #[tokio::test]
    async fn replica_failure_does_not_fail_primary() {
        let dir = tempfile::tempdir().unwrap();
        let store = mirrored_store(&dir).await;
        let replica = store.replica().unwrap().pool().clone();

        // every mirror write now fails
        sqlx::query("DROP TABLE pastes")
            .execute(replica.inner())
            .await
            .unwrap();

        let mut paste = store
            .create(NewPaste {
                title: "survives".to_owned(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paste.id.len(), 16);
        assert_eq!(store.get(&paste.id).await.unwrap().title, "survives");

        paste.title = "still fine".to_owned();
        store.update(&paste).await.unwrap();
        assert_eq!(store.delete_expired().await.unwrap(), 0);
        store.delete(&paste.id).await.unwrap();
    }

    #[tokio::test]
    async fn mirror_all_copies_rows_written_around_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = mirrored_store(&dir).await;
        let replica = store.replica().unwrap().pool().clone();

        let paste = NewPaste::default().into_paste("00000000000000aa".to_owned(), 1_700_000_000);
        insert_row(store.primary(), "INSERT", &paste, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rows_with_id(&replica, &paste.id).await, 0);

        assert_eq!(store.mirror_all().await.unwrap(), 1);
        assert_eq!(rows_with_id(&replica, &paste.id).await, 1);
    }

    #[tokio::test]
    async fn sqlite_primary_gets_no_replica() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::tests::sqlite_store(&dir, "primary.db").await;
        assert!(store.replica().is_none());
        assert!(!dir.path().join("unused-replica.db").exists());
    }

    #[tokio::test]
    async fn reconcile_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = mirrored_store(&dir).await;
        let replica = store.replica().unwrap();
        replica.reconcile(store.primary()).await.unwrap();
        store.reconcile_replica().await;
    }
}
