//! Shared harness for the engine integration tests: a temp store, the stub
//! fleet, the in-memory bus and seed helpers.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shingo_core::{config::EngineConfig, event::EventType, Engine};
use shingo_fleet::{stub::StubFleet, FleetAdapter};
use shingo_store::{
    node::{Node, NodeType},
    payload::{NewPayload, Payload, PayloadStatus},
    Store,
};
use shingo_wire::{
    bus::{InMemoryBus, MessageBus},
    envelope::{Address, Envelope},
    kind,
    message::OrderRequest,
};
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub engine: Engine,
    pub store: Store,
    pub fleet: Arc<StubFleet>,
    pub bus: Arc<InMemoryBus>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let store = Store::temporary().unwrap();
    let fleet = Arc::new(StubFleet::new());
    let bus = Arc::new(InMemoryBus::new());
    let engine = Engine::new(
        config,
        store.clone(),
        Arc::clone(&fleet) as Arc<dyn FleetAdapter>,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
    );
    Harness {
        engine,
        store,
        fleet,
        bus,
    }
}

impl Harness {
    pub async fn ingest(&self, envelope: &Envelope) {
        self.engine
            .ingestor()
            .ingest(&envelope.encode().unwrap())
            .await;
    }

    /// Pending outbox rows of one event type, decoded back into envelopes.
    pub fn outbox_envelopes(&self, event_type: &str) -> Vec<Envelope> {
        self.store
            .pending_outbox(100)
            .unwrap()
            .into_iter()
            .filter(|row| row.event_type == event_type)
            .map(|row| Envelope::decode(&row.payload).unwrap())
            .collect()
    }

    pub fn record_events(&self) -> Arc<Mutex<Vec<EventType>>> {
        let seen: Arc<Mutex<Vec<EventType>>> = Arc::default();
        let sink = Arc::clone(&seen);
        self.engine
            .events()
            .subscribe(move |event| sink.lock().push(event.kind.event_type()));
        seen
    }
}

pub fn seed_node(store: &Store, name: &str, node_type: NodeType, capacity: u32) {
    store
        .upsert_node(&Node {
            name: name.to_string(),
            vendor_location: format!("LOC-{name}"),
            node_type,
            zone: "A".to_string(),
            capacity,
            enabled: true,
        })
        .unwrap();
}

pub fn seed_payload(
    store: &Store,
    type_code: &str,
    node: &str,
    delivered_at: DateTime<Utc>,
) -> Payload {
    let payload_type = store.upsert_payload_type(type_code, "").unwrap();
    store
        .insert_payload(NewPayload {
            payload_type_id: payload_type.id,
            node: Some(node.to_string()),
            status: PayloadStatus::Available,
            delivered_at: Some(delivered_at),
            notes: String::new(),
        })
        .unwrap()
}

pub fn retrieve_request(uuid: Uuid, type_code: &str, delivery_node: &str) -> Envelope {
    request_envelope(OrderRequest {
        order_uuid: uuid,
        order_type: "retrieve".to_string(),
        payload_type_code: type_code.to_string(),
        payload_desc: String::new(),
        quantity: 1,
        delivery_node: delivery_node.to_string(),
        pickup_node: String::new(),
        staging_node: String::new(),
        load_type: String::new(),
        priority: 0,
        retrieve_empty: false,
    })
}

pub fn request_envelope(request: OrderRequest) -> Envelope {
    Envelope::new(
        kind::ORDER_REQUEST,
        Address::edge("line-01"),
        Address::core("dispatch"),
        serde_json::to_value(request).unwrap(),
    )
}
