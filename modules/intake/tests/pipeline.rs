use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use intake::{drain, Disposition, Intake, MemoryQueue};
use miniscan_core::{ScanKey, ScanStore};
use reconcile::Processor;
use results_sqlite::SqliteStore;
use serde_json::json;
use std::sync::Arc;

fn v1(ip: &str, port: u32, ts: i64, text: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ip": ip, "port": port, "service": "SSH", "timestamp": ts,
        "data_version": 1, "data": { "response_bytes_utf8": STANDARD.encode(text) },
    }))
    .unwrap()
}

fn v2(ip: &str, port: u32, ts: i64, text: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ip": ip, "port": port, "service": "SSH", "timestamp": ts,
        "data_version": 2, "data": { "response_str": text },
    }))
    .unwrap()
}

#[tokio::test]
async fn scenario_against_sqlite() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let intake = Intake::new(Processor::new(store.clone()));
    let key = ScanKey::new("1.1.1.1", 22, "SSH");

    assert_eq!(intake.handle(&v1("1.1.1.1", 22, 100, "A")).await.disposition, Disposition::Ack);
    assert_eq!(intake.handle(&v2("1.1.1.1", 22, 50, "B")).await.disposition, Disposition::Ack);
    let rec = store.get(&key).await.unwrap().unwrap();
    assert_eq!((rec.last_scanned_at, rec.response_text.as_str()), (100, "A"));

    assert_eq!(intake.handle(&v2("1.1.1.1", 22, 200, "C")).await.disposition, Disposition::Ack);
    let rec = store.get(&key).await.unwrap().unwrap();
    assert_eq!((rec.last_scanned_at, rec.response_text.as_str()), (200, "C"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shuffled_redeliveries_keep_latest_per_key() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let intake = Arc::new(Intake::new(Processor::new(store.clone())));
    let queue = Arc::new(MemoryQueue::new(3));

    // three keys, each delivered with timestamps out of order and duplicated
    for round in 0..2 {
        for ts in [30, 10, 50, 20, 40] {
            for port in [22u32, 2222, 22222] {
                let text = format!("p{port} t{ts}");
                let raw = if (ts + round) % 2 == 0 { v1("1.1.1.2", port, ts, &text) } else { v2("1.1.1.2", port, ts, &text) };
                queue.publish(raw);
            }
        }
    }
    queue.publish(b"{}".to_vec());

    let summary = drain(queue.clone(), intake, 8).await;
    assert_eq!(summary.acked, 30);
    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(summary.redelivered, 0);

    let rows = store.list().await.unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.last_scanned_at, 50);
        assert_eq!(row.response_text, format!("p{} t50", row.port));
    }
}
