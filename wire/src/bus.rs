//! The broker seam.
//!
//! The core only ever talks to the facility bus through [`MessageBus`], so a
//! concrete broker client (MQTT, NATS, ...) can be swapped in without touching
//! dispatch logic, and tests can run against [`InMemoryBus`].

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("protocol: {0}")]
    Protocol(String),
}

/// Raw frame received from a subscribed topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe client for the facility bus.
///
/// Object safe so the engine can hold `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn publish<'a>(&'a self, topic: &'a str, payload: &'a [u8])
        -> BoxFuture<'a, Result<(), BusError>>;

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<mpsc::UnboundedReceiver<BusMessage>, BusError>>;

    fn is_connected(&self) -> bool;
}

/// In-process bus used by tests and bring-up.
///
/// Fan-out is per topic; `set_connected(false)` makes every publish fail so
/// outbox retry behaviour can be exercised.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>>,
    published: Mutex<Vec<BusMessage>>,
    disconnected: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Every frame successfully published since construction, in publish order.
    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<BusMessage> {
        self.published
            .lock()
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }
}

impl MessageBus for InMemoryBus {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a [u8],
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(BusError::Connectivity("bus offline".to_string()));
            }

            let message = BusMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };

            let mut subscribers = self.subscribers.lock();
            if let Some(senders) = subscribers.get_mut(topic) {
                senders.retain(|sender| sender.send(message.clone()).is_ok());
            }
            drop(subscribers);

            self.published.lock().push(message);
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<mpsc::UnboundedReceiver<BusMessage>, BusError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers
                .lock()
                .entry(topic.to_string())
                .or_default()
                .push(tx);
            Ok(rx)
        })
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}
