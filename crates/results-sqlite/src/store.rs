use crate::{Db, StoredScan};
use anyhow::anyhow;
use async_trait::async_trait;
use miniscan_core::{ScanError, ScanKey, ScanRecord, ScanStore, StoreOp};
use std::path::Path;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tracing::{debug, info};

/// [`ScanStore`] over a single SQLite connection.
///
/// Each call runs one statement on the blocking pool. If the calling future is
/// dropped, the statement still runs to completion or not at all.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Option<Db>>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Db::open_or_create(path)?;
        info!(path = %path.display(), "opened scan store");
        Ok(Self::from_db(db))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_db(Db::open_in_memory()?))
    }

    pub fn from_db(db: Db) -> Self {
        SqliteStore { db: Arc::new(Mutex::new(Some(db))) }
    }

    /// All stored scans ordered by key.
    pub async fn list(&self) -> anyhow::Result<Vec<StoredScan>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| anyhow!("store lock poisoned"))?;
            let db = guard.as_ref().ok_or_else(|| anyhow!("store is closed"))?;
            db.list_scans()
        })
        .await?
    }

    async fn with_db<T, F>(&self, op: StoreOp, key: &ScanKey, f: F) -> Result<T, ScanError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let res = tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| anyhow!("store lock poisoned"))?;
            let db = guard.as_ref().ok_or_else(|| anyhow!("store is closed"))?;
            f(db)
        })
        .await;
        match res {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(ScanError::storage(op, Some(key), e)),
            Err(join) => Err(ScanError::storage(op, Some(key), join)),
        }
    }
}

#[async_trait]
impl ScanStore for SqliteStore {
    async fn get(&self, key: &ScanKey) -> Result<Option<ScanRecord>, ScanError> {
        let k = key.clone();
        self.with_db(StoreOp::Get, key, move |db| db.get_scan(&k)).await
    }

    async fn upsert(&self, record: &ScanRecord) -> Result<(), ScanError> {
        let rec = record.clone();
        let changed = self
            .with_db(StoreOp::Upsert, &record.key, move |db| {
                db.upsert_scan(&rec, OffsetDateTime::now_utc().unix_timestamp())
            })
            .await?;
        if !changed {
            debug!(key = %record.key, timestamp = record.last_scanned_at, "upsert guard kept newer row");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ScanError> {
        let db = self.db.clone();
        let res = tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| anyhow!("store lock poisoned"))?;
            match guard.take() {
                Some(db) => db.close(),
                None => Ok(()),
            }
        })
        .await;
        match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ScanError::storage(StoreOp::Close, None, e)),
            Err(join) => Err(ScanError::storage(StoreOp::Close, None, join)),
        }
    }
}
