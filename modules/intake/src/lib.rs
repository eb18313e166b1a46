//! In-process delivery: a queue with at-least-once redelivery, and the
//! handler that turns a processing result into an ack decision.

use miniscan_core::ScanError;
use reconcile::Processor;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// What the delivery layer should do with a message once handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Done; remove from the queue.
    Ack,
    /// Transient failure; deliver again.
    Nack,
    /// Permanent failure; park it instead of redelivering.
    DeadLetter,
}

#[derive(Debug)]
pub struct Handled {
    pub disposition: Disposition,
    pub error: Option<ScanError>,
}

/// Decodes and reconciles raw messages.
pub struct Intake {
    processor: Processor,
}

impl Intake {
    pub fn new(processor: Processor) -> Self {
        Intake { processor }
    }

    pub async fn handle(&self, data: &[u8]) -> Handled {
        let obs = match scan_decoder::decode(data) {
            Ok(obs) => obs,
            Err(e) => {
                warn!(kind = e.kind(), key = ?e.key().map(|k| k.to_string()), error = %e, "failed to decode message");
                return Handled { disposition: Disposition::DeadLetter, error: Some(e) };
            }
        };
        debug!(ip = %obs.key.ip, port = obs.key.port, service = %obs.key.service, timestamp = obs.timestamp, "decoded scan");

        match self.processor.process(&obs).await {
            Ok(()) => Handled { disposition: Disposition::Ack, error: None },
            Err(e) => {
                let disposition = if e.is_permanent() { Disposition::DeadLetter } else { Disposition::Nack };
                warn!(
                    ip = %obs.key.ip,
                    port = obs.key.port,
                    service = %obs.key.service,
                    kind = e.kind(),
                    error = %e,
                    ?disposition,
                    "failed to process scan"
                );
                Handled { disposition, error: Some(e) }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub data: Vec<u8>,
    /// Deliveries so far, including the current one.
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    dead: Vec<DeadLetter>,
}

/// FIFO queue with nack-driven redelivery, bounded by `max_deliveries`.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    max_deliveries: u32,
}

impl MemoryQueue {
    pub fn new(max_deliveries: u32) -> Self {
        MemoryQueue { state: Mutex::new(QueueState::default()), max_deliveries: max_deliveries.max(1) }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish(&self, data: Vec<u8>) -> Uuid {
        let id = Uuid::now_v7();
        self.lock().ready.push_back(Delivery { id, data, attempt: 0 });
        id
    }

    pub fn pull(&self) -> Option<Delivery> {
        let mut d = self.lock().ready.pop_front()?;
        d.attempt += 1;
        Some(d)
    }

    /// Apply a handler verdict. Returns the effective disposition: a nack on the
    /// last allowed attempt becomes a dead letter.
    pub fn settle(&self, delivery: Delivery, handled: &Handled) -> Disposition {
        let reason = || handled.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        let mut st = self.lock();
        match handled.disposition {
            Disposition::Ack => Disposition::Ack,
            Disposition::Nack if delivery.attempt < self.max_deliveries => {
                st.ready.push_back(delivery);
                Disposition::Nack
            }
            Disposition::Nack => {
                warn!(id = %delivery.id, attempts = delivery.attempt, "delivery limit reached; dead-lettering");
                st.dead.push(DeadLetter {
                    id: delivery.id,
                    attempts: delivery.attempt,
                    reason: format!("gave up after {} deliveries: {}", delivery.attempt, reason()),
                    data: delivery.data,
                });
                Disposition::DeadLetter
            }
            Disposition::DeadLetter => {
                st.dead.push(DeadLetter {
                    id: delivery.id,
                    attempts: delivery.attempt,
                    reason: reason(),
                    data: delivery.data,
                });
                Disposition::DeadLetter
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub acked: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    /// Handler tasks that panicked; their messages are lost.
    pub aborted: u64,
}

/// Consume until the queue is empty and nothing is in flight, handling up to
/// `max_in_flight` messages at once.
pub async fn drain(queue: Arc<MemoryQueue>, intake: Arc<Intake>, max_in_flight: usize) -> DrainSummary {
    let limit = max_in_flight.max(1);
    let mut tasks = JoinSet::new();
    let mut summary = DrainSummary::default();

    loop {
        while tasks.len() < limit {
            let Some(delivery) = queue.pull() else { break };
            let intake = intake.clone();
            tasks.spawn(async move {
                let handled = intake.handle(&delivery.data).await;
                (delivery, handled)
            });
        }

        match tasks.join_next().await {
            Some(Ok((delivery, handled))) => match queue.settle(delivery, &handled) {
                Disposition::Ack => summary.acked += 1,
                Disposition::Nack => summary.redelivered += 1,
                Disposition::DeadLetter => summary.dead_lettered += 1,
            },
            Some(Err(e)) => {
                error!(error = %e, "handler task failed");
                summary.aborted += 1;
            }
            None => break,
        }
    }
    summary
}
