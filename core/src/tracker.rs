//! Poller tracking the progress of active vendor orders.
//!
//! The active set (vendor order id -> last-seen vendor state) lives under a
//! mutex; every tick snapshots it, releases the lock, then fans out to the
//! fleet so `track`/`untrack` are never blocked by vendor I/O. A state change
//! is resolved back to the internal order id and emitted as
//! [`OrderStatusChanged`]; terminal states drop the entry.

use crate::{bus::EventBus, event::OrderStatusChanged};
use parking_lot::Mutex;
use shingo_fleet::FleetAdapter;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Resolves a vendor order id back to the internal order id.
pub type VendorOrderResolver = Arc<dyn Fn(&str) -> Option<i64> + Send + Sync>;

pub struct OrderTracker {
    active: Mutex<HashMap<String, String>>,
    fleet: Arc<dyn FleetAdapter>,
    resolver: VendorOrderResolver,
    events: Arc<EventBus>,
    interval: Duration,
    poll_timeout: Duration,
    stopped: AtomicBool,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for OrderTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderTracker")
            .field("active", &self.active_count())
            .field("interval", &self.interval)
            .finish()
    }
}

impl OrderTracker {
    pub fn new(
        fleet: Arc<dyn FleetAdapter>,
        resolver: VendorOrderResolver,
        events: Arc<EventBus>,
        interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            fleet,
            resolver,
            events,
            interval,
            poll_timeout,
            stopped: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start tracking a vendor order. Idempotent: the first insert seeds the
    /// last-seen state, re-tracking an id leaves it untouched. Accepted but
    /// without effect after [`stop`](Self::stop).
    pub fn track(&self, vendor_order_id: &str, initial_state: &str) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.active
            .lock()
            .entry(vendor_order_id.to_string())
            .or_insert_with(|| initial_state.to_string());
    }

    /// Stop tracking a vendor order. Idempotent.
    pub fn untrack(&self, vendor_order_id: &str) {
        self.active.lock().remove(vendor_order_id);
    }

    pub fn is_tracking(&self, vendor_order_id: &str) -> bool {
        self.active.lock().contains_key(vendor_order_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// One poll pass over the active set.
    ///
    /// Errors from a single vendor id never abort the pass.
    pub async fn tick(&self) {
        let snapshot: Vec<(String, String)> = self
            .active
            .lock()
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();

        for (vendor_order_id, last_state) in snapshot {
            let polled = tokio::time::timeout(
                self.poll_timeout,
                self.fleet.get_order_detail(&vendor_order_id),
            )
            .await;
            let detail = match polled {
                Ok(Ok(detail)) => detail,
                Ok(Err(err)) => {
                    warn!(vendor = %vendor_order_id, %err, "poll failed");
                    continue;
                }
                Err(_) => {
                    warn!(vendor = %vendor_order_id, "poll timed out");
                    continue;
                }
            };

            if detail.state == last_state {
                continue;
            }

            let terminal = self.fleet.is_terminal_state(&detail.state);
            {
                let mut active = self.active.lock();
                // Untracked mid-poll: the entry owner has moved on.
                if !active.contains_key(&vendor_order_id) {
                    continue;
                }
                if terminal {
                    active.remove(&vendor_order_id);
                } else {
                    active.insert(vendor_order_id.clone(), detail.state.clone());
                }
            }

            let Some(order_id) = (self.resolver)(&vendor_order_id) else {
                warn!(vendor = %vendor_order_id, "no order for vendor id, skipping transition");
                continue;
            };

            debug!(
                order = order_id,
                vendor = %vendor_order_id,
                from = %last_state,
                to = %detail.state,
                "vendor state changed"
            );
            self.events.emit(OrderStatusChanged {
                order_id,
                vendor_order_id,
                old_state: last_state,
                new_state: detail.state,
                robot_id: (!detail.robot_id.is_empty()).then(|| detail.robot_id.clone()),
                detail: detail.detail,
            });
        }
    }

    /// Launch the periodic poll task.
    pub fn start(self: &Arc<Self>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let tracker = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => tracker.tick().await,
                }
            }
            debug!("tracker stopped");
        });
        *self.task.lock() = Some(task);
    }

    /// Signal the poll task to exit and wait for it.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
