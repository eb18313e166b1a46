//! Token pacing for publishers that must not flood the queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Hands out at most `per_sec` permits per second, with a burst of `burst`.
/// Refill runs in a background task that stops when the pacer is dropped.
pub struct Pacer {
    sem: Arc<Semaphore>,
    refill: JoinHandle<()>,
}

impl Pacer {
    /// Must be called inside a tokio runtime.
    pub fn new(per_sec: u32, burst: usize) -> Self {
        let burst = burst.max(1);
        let sem = Arc::new(Semaphore::new(burst));
        let sem_bg = sem.clone();
        let interval = refill_interval(per_sec);
        let refill = tokio::spawn(async move {
            let mut t = tokio::time::interval(interval);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick fires immediately
            t.tick().await;
            loop {
                t.tick().await;
                if sem_bg.available_permits() < burst {
                    sem_bg.add_permits(1);
                }
            }
        });
        Pacer { sem, refill }
    }

    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}

/// One permit per interval; rates above 1M/s saturate at one per microsecond.
fn refill_interval(per_sec: u32) -> Duration {
    Duration::from_micros((1_000_000 / u64::from(per_sec.max(1))).max(1))
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.refill.abort();
    }
}
