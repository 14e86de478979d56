//! In-process multicast of [`Event`]s.
//!
//! Delivery is synchronous on the emitting task; subscribers doing long work
//! defer it themselves. The subscriber list is mutated under a mutex and
//! emission iterates a snapshot, so subscribing or unsubscribing from inside
//! a callback is safe.

use crate::event::{Event, EventKind, EventType};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque subscription handle returned by the subscribe calls.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SubscriberId(u64);

struct Subscription {
    id: SubscriberId,
    /// `None` receives everything.
    filter: Option<HashSet<EventType>>,
    callback: Callback,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a universal subscriber.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(callback))
    }

    /// Add a subscriber that only receives the listed event types.
    pub fn subscribe_types<F>(
        &self,
        types: impl IntoIterator<Item = EventType>,
        callback: F,
    ) -> SubscriberId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(Some(types.into_iter().collect()), Arc::new(callback))
    }

    fn add(&self, filter: Option<HashSet<EventType>>, callback: Callback) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription {
            id,
            filter,
            callback,
        });
        id
    }

    /// Remove a subscriber by handle. Returns whether it was present.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Deliver an event kind with the emission timestamp stamped now.
    pub fn emit(&self, kind: impl Into<EventKind>) {
        self.emit_event(Event {
            timestamp: None,
            kind: kind.into(),
        });
    }

    /// Deliver an event to every matching subscriber, stamping the timestamp
    /// when the emitter left it unset.
    pub fn emit_event(&self, mut event: Event) {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }

        let event_type = event.kind.event_type();
        let matching: Vec<Callback> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|subscription| match &subscription.filter {
                Some(filter) => filter.contains(&event_type),
                None => true,
            })
            .map(|subscription| Arc::clone(&subscription.callback))
            .collect();

        for callback in matching {
            callback(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CorrectionApplied, NodeUpdated};

    fn node_updated(name: &str) -> NodeUpdated {
        NodeUpdated::new(name.to_string(), String::new())
    }

    #[test]
    fn universal_subscriber_sees_everything_and_gets_a_timestamp() {
        let bus = EventBus::new();
        let seen: Arc<Mutex<Vec<Event>>> = Arc::default();
        let sink = Arc::clone(&seen);
        bus.subscribe(move |event| sink.lock().push(event.clone()));

        bus.emit(node_updated("S1"));
        bus.emit(CorrectionApplied::new(
            "payload".to_string(),
            "9".to_string(),
            "count fixed".to_string(),
        ));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|event| event.timestamp.is_some()));
    }

    #[test]
    fn filtered_subscriber_only_sees_its_types() {
        let bus = EventBus::new();
        let seen: Arc<Mutex<Vec<EventType>>> = Arc::default();
        let sink = Arc::clone(&seen);
        bus.subscribe_types([EventType::NodeUpdated], move |event| {
            sink.lock().push(event.kind.event_type())
        });

        bus.emit(node_updated("S1"));
        bus.emit(CorrectionApplied::new(
            "order".to_string(),
            "1".to_string(),
            String::new(),
        ));

        assert_eq!(&*seen.lock(), &[EventType::NodeUpdated]);
    }

    #[test]
    fn unsubscribe_restores_prior_state() {
        let bus = EventBus::new();
        let before = bus.subscriber_count();
        let id = bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), before + 1);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), before);
        // Idempotent: a second unsubscribe is a no-op.
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn subscribing_during_emission_is_safe() {
        let bus = Arc::new(EventBus::new());
        let bus_inner = Arc::clone(&bus);
        let late_calls: Arc<Mutex<u32>> = Arc::default();
        let late_calls_inner = Arc::clone(&late_calls);

        bus.subscribe(move |_| {
            let counter = Arc::clone(&late_calls_inner);
            bus_inner.subscribe(move |_| *counter.lock() += 1);
        });

        // The subscriber added mid-emission must not receive the event that
        // triggered it.
        bus.emit(node_updated("S1"));
        assert_eq!(*late_calls.lock(), 0);

        bus.emit(node_updated("S2"));
        assert_eq!(*late_calls.lock(), 1);
    }

    #[test]
    fn existing_timestamp_is_preserved() {
        let bus = EventBus::new();
        let stamped = Event {
            timestamp: Some(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
            kind: EventKind::NodeUpdated(node_updated("S1")),
        };
        let seen: Arc<Mutex<Vec<Event>>> = Arc::default();
        let sink = Arc::clone(&seen);
        bus.subscribe(move |event| sink.lock().push(event.clone()));

        bus.emit_event(stamped.clone());
        assert_eq!(seen.lock()[0].timestamp, stamped.timestamp);
    }
}
