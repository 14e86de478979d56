//! Periodic publisher of pending outbox rows.
//!
//! Each drain pulls up to the batch limit of unsent rows in enqueue order and
//! publishes them to the recorded topic. A publish failure only bumps the
//! retry counter; the row stays pending and is retried on the next drain.
//! Drains are serialised by construction: one task, one drain at a time.

use crate::error::EngineError;
use chrono::Utc;
use parking_lot::Mutex;
use shingo_store::Store;
use shingo_wire::bus::MessageBus;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Outcome of one drain pass.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DrainOutcome {
    pub sent: usize,
    pub failed: usize,
}

pub struct OutboxDrainer {
    store: Store,
    bus: Arc<dyn MessageBus>,
    interval: Duration,
    batch: usize,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for OutboxDrainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboxDrainer")
            .field("interval", &self.interval)
            .field("batch", &self.batch)
            .finish()
    }
}

impl OutboxDrainer {
    pub fn new(store: Store, bus: Arc<dyn MessageBus>, interval: Duration, batch: usize) -> Self {
        Self {
            store,
            bus,
            interval,
            batch,
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// One drain pass. A row is only marked sent after the bus accepted it.
    pub async fn drain_once(&self) -> Result<DrainOutcome, EngineError> {
        let mut outcome = DrainOutcome::default();
        for row in self.store.pending_outbox(self.batch)? {
            match self.bus.publish(&row.topic, &row.payload).await {
                Ok(()) => {
                    self.store.mark_outbox_sent(row.id, Utc::now())?;
                    outcome.sent += 1;
                }
                Err(err) => {
                    let retries = self.store.record_outbox_failure(row.id)?;
                    warn!(row = row.id, topic = %row.topic, retries, %err, "outbox publish failed");
                    outcome.failed += 1;
                }
            }
        }
        if outcome.sent > 0 {
            debug!(sent = outcome.sent, failed = outcome.failed, "outbox drained");
        }
        Ok(outcome)
    }

    /// Launch the periodic drain task.
    pub fn start(self: &Arc<Self>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let drainer = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(drainer.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = drainer.drain_once().await {
                            error!(%err, "drain pass failed");
                        }
                    }
                }
            }
            debug!("outbox drainer stopped");
        });
        *self.task.lock() = Some(task);
    }

    /// Signal the drain task to exit and wait for it.
    pub async fn stop(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
