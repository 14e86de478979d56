//! Engine wiring and lifecycle.
//!
//! The engine owns the dispatcher, tracker, outbox drainer and health probe,
//! subscribes the cross-cutting event handlers, and exposes `start`/`stop`.
//! On start it reloads the tracker from every non-terminal order so a restart
//! never loses visibility of in-flight vendor orders.

use crate::{
    bus::EventBus,
    config::EngineConfig,
    dispatch::Dispatcher,
    error::EngineError,
    event::{
        Event, EventKind, EventType, FleetConnected, FleetDisconnected, MessagingConnected,
        MessagingDisconnected, OrderCancelled, OrderCompleted, OrderFailed, OrderStatusChanged,
        PayloadChanged,
    },
    ingest::Ingestor,
    outbox_drain::OutboxDrainer,
    tracker::OrderTracker,
};
use chrono::Utc;
use parking_lot::Mutex;
use shingo_fleet::FleetAdapter;
use shingo_store::{
    node::NodeType,
    order::OrderStatus,
    payload::PayloadStatus,
    NodeStateCache, Store,
};
use shingo_wire::{
    bus::MessageBus,
    envelope::Address,
    kind,
    message::{ErrorCode, OrderDelivered, OrderError, OrderUpdate, OrderWaybill},
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct Engine {
    config: EngineConfig,
    store: Store,
    cache: Arc<NodeStateCache>,
    fleet: Arc<dyn FleetAdapter>,
    bus: Arc<dyn MessageBus>,
    events: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<OrderTracker>,
    drainer: Arc<OutboxDrainer>,
    fleet_up: Arc<AtomicBool>,
    bus_up: Arc<AtomicBool>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("station", &self.config.station)
            .field("fleet", &self.fleet.name())
            .field("bus", &self.bus.name())
            .finish()
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Store,
        fleet: Arc<dyn FleetAdapter>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let cache = Arc::new(NodeStateCache::new(store.clone()));

        let dispatcher = Arc::new(Dispatcher::new(
            config.station.clone(),
            config.dispatch_topic.clone(),
            config.fleet_timeout(),
            store.clone(),
            Arc::clone(&fleet),
            Arc::clone(&events),
        ));

        let resolver_store = store.clone();
        let tracker = Arc::new(OrderTracker::new(
            Arc::clone(&fleet),
            Arc::new(move |vendor_order_id: &str| {
                match resolver_store.order_by_vendor_id(vendor_order_id) {
                    Ok(order) => order.map(|order| order.id),
                    Err(err) => {
                        warn!(vendor = vendor_order_id, %err, "vendor id lookup failed");
                        None
                    }
                }
            }),
            Arc::clone(&events),
            config.tracker_interval(),
            config.fleet_timeout(),
        ));

        let drainer = Arc::new(OutboxDrainer::new(
            store.clone(),
            Arc::clone(&bus),
            config.drain_interval(),
            config.drain_batch,
        ));

        let engine = Self {
            config,
            store,
            cache,
            fleet,
            bus,
            events,
            dispatcher,
            tracker,
            drainer,
            fleet_up: Arc::new(AtomicBool::new(false)),
            bus_up: Arc::new(AtomicBool::new(false)),
            stop_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        };
        engine.subscribe_handlers();
        engine
    }

    fn subscribe_handlers(&self) {
        // Redirect bookkeeping: follow the vendor binding of record.
        let tracker = Arc::clone(&self.tracker);
        self.events
            .subscribe_types([EventType::OrderDispatched], move |event: &Event| {
                if let EventKind::OrderDispatched(dispatched) = &event.kind {
                    if let Some(previous) = &dispatched.previous_vendor_order_id {
                        if previous != &dispatched.vendor_order_id {
                            tracker.untrack(previous);
                        }
                    }
                    tracker.track(&dispatched.vendor_order_id, &dispatched.vendor_state);
                }
            });

        // Vendor progress: robot assignment, status mirroring, terminal handling.
        let store = self.store.clone();
        let fleet = Arc::clone(&self.fleet);
        let dispatcher = Arc::clone(&self.dispatcher);
        let events = Arc::clone(&self.events);
        self.events
            .subscribe_types([EventType::OrderStatusChanged], move |event: &Event| {
                if let EventKind::OrderStatusChanged(change) = &event.kind {
                    if let Err(err) =
                        apply_status_change(&store, fleet.as_ref(), &dispatcher, &events, change)
                    {
                        error!(order = change.order_id, %err, "status change handling failed");
                    }
                }
            });

        // Confirmed orders move their claimed payloads to the delivery node.
        let store = self.store.clone();
        let cache = Arc::clone(&self.cache);
        let events = Arc::clone(&self.events);
        self.events
            .subscribe_types([EventType::OrderCompleted], move |event: &Event| {
                if let EventKind::OrderCompleted(completed) = &event.kind {
                    if let Err(err) = move_completed_payloads(&store, &cache, &events, completed) {
                        error!(order = completed.order_id, %err, "payload handoff failed");
                    }
                }
            });

        // Audit trail.
        let store = self.store.clone();
        self.events.subscribe_types(
            [
                EventType::OrderReceived,
                EventType::OrderFailed,
                EventType::OrderCancelled,
                EventType::PayloadChanged,
                EventType::NodeUpdated,
                EventType::CorrectionApplied,
            ],
            move |event: &Event| {
                if let Err(err) = append_audit(&store, event) {
                    error!(%err, "audit append failed");
                }
            },
        );
    }

    /// Reload tracker state, subscribe to the orders topic and launch the
    /// periodic tasks.
    pub async fn start(&self) -> Result<(), EngineError> {
        for order in self.store.active_orders()? {
            if let Some(vendor_order_id) = &order.vendor_order_id {
                let initial = order
                    .vendor_state
                    .as_deref()
                    .unwrap_or(shingo_fleet::state::CREATED);
                self.tracker.track(vendor_order_id, initial);
            }
        }
        if self.tracker.active_count() > 0 {
            info!(active = self.tracker.active_count(), "tracker reloaded from store");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let frames = self.bus.subscribe(&self.config.orders_topic).await?;
        let ingestor = self.ingestor();
        let consumer_stop = stop_rx.clone();
        self.tasks.lock().push(tokio::spawn(async move {
            ingestor.run(frames, consumer_stop).await;
        }));

        self.tracker.start();
        self.drainer.start();
        self.spawn_probe(stop_rx);

        info!(
            station = %self.config.station,
            orders_topic = %self.config.orders_topic,
            dispatch_topic = %self.config.dispatch_topic,
            fleet = self.fleet.name(),
            "engine started"
        );
        Ok(())
    }

    /// Build the inbound pipeline: only envelopes addressed to this core (or
    /// broadcast to the core role) pass the header gate.
    pub fn ingestor(&self) -> Ingestor<Dispatcher> {
        let core_address = Address::core(self.config.station.clone());
        Ingestor::new(Arc::clone(&self.dispatcher))
            .with_filter(move |header| header.dst.matches(&core_address))
    }

    fn spawn_probe(&self, mut stop_rx: watch::Receiver<bool>) {
        let fleet = Arc::clone(&self.fleet);
        let bus = Arc::clone(&self.bus);
        let events = Arc::clone(&self.events);
        let fleet_up = Arc::clone(&self.fleet_up);
        let bus_up = Arc::clone(&self.bus_up);
        let probe_timeout = self.config.probe_timeout();
        let probe_interval = self.config.probe_interval();

        self.tasks.lock().push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        probe_connections(
                            fleet.as_ref(),
                            bus.as_ref(),
                            &events,
                            &fleet_up,
                            &bus_up,
                            probe_timeout,
                        )
                        .await;
                    }
                }
            }
            debug!("connection probe stopped");
        }));
    }

    /// One health probe pass. The periodic task calls this on its interval.
    pub async fn probe_once(&self) {
        probe_connections(
            self.fleet.as_ref(),
            self.bus.as_ref(),
            &self.events,
            &self.fleet_up,
            &self.bus_up,
            self.config.probe_timeout(),
        )
        .await;
    }

    /// Stop every periodic task and the consumer loop. Loops exit on their
    /// next select without finishing remaining work.
    pub async fn stop(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        self.tracker.stop().await;
        self.drainer.stop().await;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("engine stopped");
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cache(&self) -> &Arc<NodeStateCache> {
        &self.cache
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn tracker(&self) -> &Arc<OrderTracker> {
        &self.tracker
    }

    pub fn drainer(&self) -> &Arc<OutboxDrainer> {
        &self.drainer
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

/// Mirror a vendor-side transition onto the order row and the requester.
fn apply_status_change(
    store: &Store,
    fleet: &dyn FleetAdapter,
    dispatcher: &Dispatcher,
    events: &EventBus,
    change: &OrderStatusChanged,
) -> Result<(), EngineError> {
    let Some(order) = store.order(change.order_id)? else {
        warn!(order = change.order_id, "status change for unknown order");
        return Ok(());
    };

    // (a) First robot assignment produces the waybill.
    if let Some(robot_id) = &change.robot_id {
        if order.robot_id.is_none() {
            store.set_order_robot(order.id, robot_id)?;
            let waybill = dispatcher.outbox_to_station(
                &order.station,
                kind::ORDER_WAYBILL,
                serde_json::to_value(OrderWaybill {
                    order_uuid: order.uuid,
                    waybill_id: change.vendor_order_id.clone(),
                    robot_id: robot_id.clone(),
                    eta: None,
                })?,
            )?;
            store.enqueue_outbox(waybill)?;
            info!(order = order.id, robot = %robot_id, "robot assigned");
        }
    }

    store.record_vendor_state(order.id, &change.new_state)?;

    // (b) Translate and mirror the canonical status.
    let canonical = fleet.map_state(&change.new_state);
    if canonical == order.status || order.status.is_terminal() || !order.status.allows(canonical) {
        return Ok(());
    }
    let detail = if change.detail.is_empty() {
        format!("vendor state {}", change.new_state)
    } else {
        change.detail.clone()
    };

    // (c) Terminal vendor states fan out to their sub-handler.
    match canonical {
        OrderStatus::Delivered => {
            let update = dispatcher.outbox_to_station(
                &order.station,
                kind::ORDER_UPDATE,
                serde_json::to_value(OrderUpdate {
                    order_uuid: order.uuid,
                    status: canonical.to_string(),
                    detail: detail.clone(),
                    eta: None,
                })?,
            )?;
            store.update_order_status_with_outbox(order.id, canonical, &detail, update)?;
            let delivered = dispatcher.outbox_to_station(
                &order.station,
                kind::ORDER_DELIVERED,
                serde_json::to_value(OrderDelivered {
                    order_uuid: order.uuid,
                    delivered_at: Utc::now(),
                })?,
            )?;
            store.enqueue_outbox(delivered)?;
            info!(order = order.id, "delivered by fleet");
        }
        OrderStatus::Failed => {
            let reply = dispatcher.outbox_to_station(
                &order.station,
                kind::ORDER_ERROR,
                serde_json::to_value(OrderError {
                    order_uuid: order.uuid,
                    error_code: ErrorCode::FleetFailed,
                    detail: detail.clone(),
                })?,
            )?;
            store.update_order_status_with_outbox(order.id, OrderStatus::Failed, &detail, reply)?;
            store.unclaim_for_order(order.id)?;
            events.emit(OrderFailed {
                order_id: order.id,
                uuid: order.uuid,
                station: order.station.clone(),
                code: ErrorCode::FleetFailed,
                detail,
            });
        }
        OrderStatus::Cancelled => {
            let reply = dispatcher.outbox_to_station(
                &order.station,
                kind::ORDER_CANCELLED,
                serde_json::to_value(shingo_wire::message::OrderCancelled {
                    order_uuid: order.uuid,
                    reason: detail.clone(),
                })?,
            )?;
            store.update_order_status_with_outbox(
                order.id,
                OrderStatus::Cancelled,
                &detail,
                reply,
            )?;
            store.unclaim_for_order(order.id)?;
            events.emit(OrderCancelled {
                order_id: order.id,
                uuid: order.uuid,
                station: order.station.clone(),
                reason: detail,
            });
        }
        status => {
            let update = dispatcher.outbox_to_station(
                &order.station,
                kind::ORDER_UPDATE,
                serde_json::to_value(OrderUpdate {
                    order_uuid: order.uuid,
                    status: status.to_string(),
                    detail: detail.clone(),
                    eta: None,
                })?,
            )?;
            store.update_order_status_with_outbox(order.id, status, &detail, update)?;
        }
    }
    Ok(())
}

/// A confirmed order hands its claimed payloads over to the delivery node.
fn move_completed_payloads(
    store: &Store,
    cache: &NodeStateCache,
    events: &EventBus,
    completed: &OrderCompleted,
) -> Result<(), EngineError> {
    let Some(order) = store.order(completed.order_id)? else {
        warn!(order = completed.order_id, "completion for unknown order");
        return Ok(());
    };
    let Some(delivery) = order.delivery_node.clone() else {
        warn!(order = order.id, "completed order has no delivery node");
        return Ok(());
    };

    let arrival_status = match store.node(&delivery)? {
        Some(node) if node.node_type == NodeType::LineSide => PayloadStatus::AtLine,
        _ => PayloadStatus::Available,
    };

    for payload in store.payloads_claimed_by(order.id)? {
        let moved = cache.move_payload(payload.id, &delivery, arrival_status)?;
        events.emit(PayloadChanged {
            payload_id: moved.id,
            action: "moved".to_string(),
            node: Some(delivery.clone()),
            detail: format!("order {} confirmed", order.id),
        });
    }
    Ok(())
}

fn append_audit(store: &Store, event: &Event) -> Result<(), EngineError> {
    match &event.kind {
        EventKind::OrderReceived(received) => {
            store.append_audit(
                "order",
                &received.order_id.to_string(),
                "received",
                &received.order_type.to_string(),
            )?;
        }
        EventKind::OrderFailed(failed) => {
            store.append_audit(
                "order",
                &failed.order_id.to_string(),
                "failed",
                &format!("{}: {}", failed.code, failed.detail),
            )?;
        }
        EventKind::OrderCancelled(cancelled) => {
            store.append_audit(
                "order",
                &cancelled.order_id.to_string(),
                "cancelled",
                &cancelled.reason,
            )?;
        }
        EventKind::PayloadChanged(changed) => {
            store.append_audit(
                "payload",
                &changed.payload_id.to_string(),
                &changed.action,
                &changed.detail,
            )?;
        }
        EventKind::NodeUpdated(updated) => {
            store.append_audit("node", &updated.node, "updated", &updated.detail)?;
        }
        EventKind::CorrectionApplied(correction) => {
            store.append_audit(
                &correction.entity_type,
                &correction.entity_id,
                "correction",
                &correction.detail,
            )?;
        }
        _ => {}
    }
    Ok(())
}

/// Probe the fleet and the broker, emitting connection events on edges.
async fn probe_connections(
    fleet: &dyn FleetAdapter,
    bus: &dyn MessageBus,
    events: &EventBus,
    fleet_up: &AtomicBool,
    bus_up: &AtomicBool,
    probe_timeout: Duration,
) {
    let fleet_ok = matches!(
        tokio::time::timeout(probe_timeout, fleet.ping()).await,
        Ok(Ok(()))
    );
    if fleet_ok {
        if !fleet_up.swap(true, Ordering::SeqCst) {
            info!(vendor = fleet.name(), "fleet connected");
            events.emit(FleetConnected::new(fleet.name().to_string()));
        }
    } else if fleet_up.swap(false, Ordering::SeqCst) {
        warn!(vendor = fleet.name(), "fleet disconnected");
        events.emit(FleetDisconnected::new(fleet.name().to_string()));
    }

    let bus_ok = bus.is_connected();
    if bus_ok {
        if !bus_up.swap(true, Ordering::SeqCst) {
            info!(broker = bus.name(), "messaging connected");
            events.emit(MessagingConnected::new(bus.name().to_string()));
        }
    } else if bus_up.swap(false, Ordering::SeqCst) {
        warn!(broker = bus.name(), "messaging disconnected");
        events.emit(MessagingDisconnected::new(bus.name().to_string()));
    }
}
