use crate::{ScanError, ScanKey, ScanRecord, StoreOp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Storage the reconciler depends on.
///
/// `upsert` must enforce the timestamp guard atomically on its own: a record is
/// replaced only when the incoming `last_scanned_at` is strictly greater than the
/// stored one. Callers may race, so a read-then-write in the caller is not enough.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Point lookup. Absence is `Ok(None)`, not an error.
    async fn get(&self, key: &ScanKey) -> Result<Option<ScanRecord>, ScanError>;

    /// Insert if absent, else replace only if `record` is strictly newer.
    async fn upsert(&self, record: &ScanRecord) -> Result<(), ScanError>;

    async fn close(&self) -> Result<(), ScanError>;
}

/// In-process store. The guard runs under the map lock, so concurrent upserts
/// for the same key cannot lose the newest write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<ScanKey, ScanRecord>>,
    ops: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of get/upsert calls served so far.
    pub fn op_count(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows_view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records, sorted by key.
    pub fn records(&self) -> Vec<ScanRecord> {
        let mut out: Vec<ScanRecord> = self.rows_view().values().cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    // single-insert writes never leave the map half-updated, so read through poison
    fn rows_view(&self) -> MutexGuard<'_, HashMap<ScanKey, ScanRecord>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_open(&self, op: StoreOp, key: &ScanKey) -> Result<(), ScanError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScanError::storage(op, Some(key), "store is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn get(&self, key: &ScanKey) -> Result<Option<ScanRecord>, ScanError> {
        self.check_open(StoreOp::Get, key)?;
        self.ops.fetch_add(1, Ordering::SeqCst);
        let rows = self
            .rows
            .lock()
            .map_err(|_| ScanError::storage(StoreOp::Get, Some(key), "lock poisoned"))?;
        Ok(rows.get(key).cloned())
    }

    async fn upsert(&self, record: &ScanRecord) -> Result<(), ScanError> {
        self.check_open(StoreOp::Upsert, &record.key)?;
        self.ops.fetch_add(1, Ordering::SeqCst);
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| ScanError::storage(StoreOp::Upsert, Some(&record.key), "lock poisoned"))?;
        match rows.get(&record.key) {
            Some(existing) if existing.last_scanned_at >= record.last_scanned_at => {}
            _ => {
                rows.insert(record.key.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ScanError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
