//! Last-write-wins reconciliation of scan observations.

use miniscan_core::{Observation, ScanError, ScanRecord, ScanStore};
use std::sync::Arc;
use tracing::debug;

/// Applies observations to a [`ScanStore`], keeping the newest per key.
///
/// The lookup before writing only saves a round trip for stale or duplicate
/// deliveries. Two concurrent calls for one key can both see the same state;
/// the store's conditional upsert settles that race.
#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn ScanStore>,
}

impl Processor {
    pub fn new(store: Arc<dyn ScanStore>) -> Self {
        Processor { store }
    }

    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    /// Reconcile one observation. Stale or duplicate observations succeed without
    /// writing; store failures come back as [`ScanError::Storage`].
    pub async fn process(&self, obs: &Observation) -> Result<(), ScanError> {
        if let Some(existing) = self.store.get(&obs.key).await? {
            if existing.last_scanned_at >= obs.timestamp {
                debug!(
                    ip = %obs.key.ip,
                    port = obs.key.port,
                    service = %obs.key.service,
                    stored = existing.last_scanned_at,
                    incoming = obs.timestamp,
                    "observation not newer than stored record; skipping"
                );
                return Ok(());
            }
        }

        self.store.upsert(&ScanRecord::from(obs)).await?;
        debug!(
            ip = %obs.key.ip,
            port = obs.key.port,
            service = %obs.key.service,
            timestamp = obs.timestamp,
            "scan record written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use miniscan_core::{MemoryStore, ScanKey, StoreOp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    fn obs(ts: i64, text: &str) -> Observation {
        Observation {
            key: ScanKey::new("192.168.1.3", 8080, "HTTP"),
            timestamp: ts,
            response_text: text.into(),
        }
    }

    fn setup() -> (Arc<MemoryStore>, Processor) {
        let store = Arc::new(MemoryStore::new());
        let proc = Processor::new(store.clone());
        (store, proc)
    }

    async fn stored(store: &MemoryStore, key: &ScanKey) -> (i64, String) {
        let rec = store.get(key).await.unwrap().expect("record present");
        (rec.last_scanned_at, rec.response_text)
    }

    #[tokio::test]
    async fn new_key_is_inserted() {
        let (store, proc) = setup();
        let o = obs(1000, "test response");
        proc.process(&o).await.unwrap();
        assert_eq!(stored(&store, &o.key).await, (1000, "test response".to_string()));
    }

    #[tokio::test]
    async fn out_of_order_scenario() {
        let (store, proc) = setup();
        let key = obs(0, "").key;

        proc.process(&obs(100, "A")).await.unwrap();
        assert_eq!(stored(&store, &key).await, (100, "A".to_string()));

        proc.process(&obs(50, "B")).await.unwrap();
        assert_eq!(stored(&store, &key).await, (100, "A".to_string()));

        proc.process(&obs(200, "C")).await.unwrap();
        assert_eq!(stored(&store, &key).await, (200, "C".to_string()));
    }

    #[tokio::test]
    async fn replay_is_a_noop_without_write() {
        let (store, proc) = setup();
        let o = obs(100, "A");
        proc.process(&o).await.unwrap();
        let ops = store.op_count();

        proc.process(&o).await.unwrap();
        proc.process(&obs(100, "different text, same ts")).await.unwrap();
        // one lookup each, no upserts
        assert_eq!(store.op_count(), ops + 2);
        assert_eq!(stored(&store, &o.key).await, (100, "A".to_string()));
    }

    #[tokio::test]
    async fn any_delivery_order_keeps_the_maximum() {
        let texts = [(30, "c"), (10, "a"), (50, "e"), (20, "b"), (40, "d")];
        let orders: [[usize; 5]; 4] =
            [[0, 1, 2, 3, 4], [4, 3, 2, 1, 0], [2, 0, 4, 1, 3], [1, 3, 0, 4, 2]];
        for order in orders {
            let (store, proc) = setup();
            for i in order {
                let (ts, text) = texts[i];
                proc.process(&obs(ts, text)).await.unwrap();
            }
            assert_eq!(stored(&store, &obs(0, "").key).await, (50, "e".to_string()));
        }
    }

    /// Lets both racers finish their lookup before either writes.
    struct RacingStore {
        inner: MemoryStore,
        gate: Barrier,
    }

    #[async_trait]
    impl ScanStore for RacingStore {
        async fn get(&self, key: &ScanKey) -> Result<Option<ScanRecord>, ScanError> {
            let found = self.inner.get(key).await;
            self.gate.wait().await;
            found
        }
        async fn upsert(&self, record: &ScanRecord) -> Result<(), ScanError> {
            self.inner.upsert(record).await
        }
        async fn close(&self) -> Result<(), ScanError> {
            self.inner.close().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_keep_the_newest() {
        for (first, second) in [(100, 200), (200, 100)] {
            let store = Arc::new(RacingStore { inner: MemoryStore::new(), gate: Barrier::new(2) });
            let proc = Processor::new(store.clone());
            let (a, b) = (obs(first, &format!("t{first}")), obs(second, &format!("t{second}")));
            let (p1, p2) = (proc.clone(), proc.clone());
            let h1 = tokio::spawn(async move { p1.process(&a).await });
            let h2 = tokio::spawn(async move { p2.process(&b).await });
            h1.await.unwrap().unwrap();
            h2.await.unwrap().unwrap();

            let rec = store.inner.get(&obs(0, "").key).await.unwrap().unwrap();
            assert_eq!(rec.last_scanned_at, 200);
            assert_eq!(rec.response_text, "t200");
        }
    }

    struct FailingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScanStore for FailingStore {
        async fn get(&self, key: &ScanKey) -> Result<Option<ScanRecord>, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ScanError::storage(StoreOp::Get, Some(key), "connection refused"))
        }
        async fn upsert(&self, record: &ScanRecord) -> Result<(), ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ScanError::storage(StoreOp::Upsert, Some(&record.key), "connection refused"))
        }
        async fn close(&self) -> Result<(), ScanError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lookup_failure_propagates_and_skips_write() {
        let store = Arc::new(FailingStore { calls: AtomicUsize::new(0) });
        let proc = Processor::new(store.clone());
        let err = proc.process(&obs(1, "x")).await.unwrap_err();
        match &err {
            ScanError::Storage { op, key, .. } => {
                assert_eq!(*op, StoreOp::Get);
                assert_eq!(key.as_ref(), Some(&obs(0, "").key));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_permanent());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
