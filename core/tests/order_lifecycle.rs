//! End-to-end order lifecycle scenarios: inbound envelope through dispatch,
//! fleet placement, vendor progress and the outbound reply trail.

mod common;

use chrono::{TimeDelta, Utc};
use common::*;
use shingo_core::event::EventType;
use shingo_fleet::state;
use shingo_store::{
    node::NodeType,
    order::OrderStatus,
    payload::PayloadStatus,
};
use shingo_wire::{
    envelope::{Address, Envelope},
    kind,
    message::{
        ErrorCode, OrderAck, OrderCancel, OrderError, OrderReceipt, OrderRedirect, OrderRequest,
        OrderStorageWaybill,
    },
};
use uuid::Uuid;

#[tokio::test]
async fn retrieve_with_no_source_fails_with_no_source() {
    let harness = harness();
    harness.store.upsert_payload_type("PART-A", "").unwrap();
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    let seen = harness.record_events();

    let uuid = Uuid::new_v4();
    let request = retrieve_request(uuid, "PART-A", "LINE1-IN");
    harness.ingest(&request).await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);

    let statuses: Vec<OrderStatus> = harness
        .store
        .order_history(order.id)
        .unwrap()
        .iter()
        .map(|row| row.status)
        .collect();
    assert_eq!(
        statuses,
        vec![OrderStatus::Pending, OrderStatus::Sourcing, OrderStatus::Failed]
    );

    let errors = harness.outbox_envelopes(kind::ORDER_ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].cor, Some(request.id));
    let error: OrderError = errors[0].parse_payload().unwrap();
    assert_eq!(error.error_code, ErrorCode::NoSource);
    assert_eq!(error.order_uuid, uuid);

    let seen = seen.lock();
    assert_eq!(
        seen.iter()
            .filter(|event| **event == EventType::OrderReceived)
            .count(),
        1
    );
    assert_eq!(
        seen.iter()
            .filter(|event| **event == EventType::OrderFailed)
            .count(),
        1
    );
}

#[tokio::test]
async fn retrieve_success_claims_dispatches_and_acks() {
    let harness = harness();
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    let payload = seed_payload(&harness.store, "PART-A", "S1", Utc::now());

    let uuid = Uuid::new_v4();
    let request = retrieve_request(uuid, "PART-A", "LINE1-IN");
    harness.ingest(&request).await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Dispatched);
    assert_eq!(order.pickup_node.as_deref(), Some("S1"));
    assert_eq!(order.delivery_node.as_deref(), Some("LINE1-IN"));
    let vendor_order_id = order.vendor_order_id.clone().unwrap();
    assert!(vendor_order_id.starts_with(&format!("sg-{}-", order.id)));

    let statuses: Vec<OrderStatus> = harness
        .store
        .order_history(order.id)
        .unwrap()
        .iter()
        .map(|row| row.status)
        .collect();
    assert_eq!(
        statuses,
        vec![OrderStatus::Pending, OrderStatus::Sourcing, OrderStatus::Dispatched]
    );

    let claimed = harness.store.payload(payload.id).unwrap().unwrap();
    assert_eq!(claimed.claimed_by, Some(order.id));

    let placements = harness.fleet.requests();
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].from_location, "LOC-S1");
    assert_eq!(placements[0].to_location, "LOC-LINE1-IN");
    assert_eq!(placements[0].external_id, uuid);

    let acks = harness.outbox_envelopes(kind::ORDER_ACK);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].cor, Some(request.id));
    assert_eq!(acks[0].dst, Address::edge("line-01"));
    let ack: OrderAck = acks[0].parse_payload().unwrap();
    assert_eq!(ack.shingo_order_id, order.id);
    assert_eq!(ack.source_node, "S1");

    assert!(harness.engine.tracker().is_tracking(&vendor_order_id));
}

#[tokio::test]
async fn retrieve_selects_first_in_first_out() {
    let harness = harness();
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    let newer = seed_payload(&harness.store, "PART-A", "S1", Utc::now());
    let older = seed_payload(
        &harness.store,
        "PART-A",
        "S1",
        Utc::now() - TimeDelta::hours(6),
    );

    let uuid = Uuid::new_v4();
    harness
        .ingest(&retrieve_request(uuid, "PART-A", "LINE1-IN"))
        .await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.payload_id, Some(older.id));
    assert_eq!(
        harness.store.payload(newer.id).unwrap().unwrap().claimed_by,
        None
    );
}

#[tokio::test]
async fn redirect_mid_flight_replaces_the_vendor_order() {
    let harness = harness();
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    seed_node(&harness.store, "LINE2-IN", NodeType::LineSide, 2);
    seed_payload(&harness.store, "PART-A", "S1", Utc::now());

    let uuid = Uuid::new_v4();
    harness
        .ingest(&retrieve_request(uuid, "PART-A", "LINE1-IN"))
        .await;
    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    let first_vendor_id = order.vendor_order_id.clone().unwrap();

    let redirect = Envelope::new(
        kind::ORDER_REDIRECT,
        Address::edge("line-01"),
        Address::core("dispatch"),
        serde_json::to_value(OrderRedirect {
            order_uuid: uuid,
            new_delivery_node: "LINE2-IN".to_string(),
        })
        .unwrap(),
    );
    harness.ingest(&redirect).await;

    assert_eq!(harness.fleet.cancelled(), vec![first_vendor_id.clone()]);

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    let second_vendor_id = order.vendor_order_id.clone().unwrap();
    assert_ne!(second_vendor_id, first_vendor_id);
    assert_eq!(order.status, OrderStatus::Dispatched);
    assert_eq!(order.delivery_node.as_deref(), Some("LINE2-IN"));
    assert_eq!(order.pickup_node.as_deref(), Some("S1"));

    assert!(!harness.engine.tracker().is_tracking(&first_vendor_id));
    assert!(harness.engine.tracker().is_tracking(&second_vendor_id));

    // One ack per successful placement.
    assert_eq!(harness.outbox_envelopes(kind::ORDER_ACK).len(), 2);

    let placements = harness.fleet.requests();
    assert_eq!(placements[1].to_location, "LOC-LINE2-IN");
}

#[tokio::test]
async fn cancel_after_dispatch_unclaims_and_replies() {
    let harness = harness();
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    let payload = seed_payload(&harness.store, "PART-A", "S1", Utc::now());

    let uuid = Uuid::new_v4();
    harness
        .ingest(&retrieve_request(uuid, "PART-A", "LINE1-IN"))
        .await;
    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    let vendor_order_id = order.vendor_order_id.clone().unwrap();

    let cancel = Envelope::new(
        kind::ORDER_CANCEL,
        Address::edge("line-01"),
        Address::core("dispatch"),
        serde_json::to_value(OrderCancel {
            order_uuid: uuid,
            reason: "operator".to_string(),
        })
        .unwrap(),
    );
    harness.ingest(&cancel).await;

    assert_eq!(harness.fleet.cancelled(), vec![vendor_order_id]);
    assert_eq!(
        harness.store.payload(payload.id).unwrap().unwrap().claimed_by,
        None
    );

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.completed_at.is_some());

    let cancelled = harness.outbox_envelopes(kind::ORDER_CANCELLED);
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].cor, Some(cancel.id));

    // A second cancel is ignored: the order is terminal.
    harness.ingest(&cancel).await;
    assert_eq!(harness.outbox_envelopes(kind::ORDER_CANCELLED).len(), 1);
}

#[tokio::test]
async fn vendor_delivery_then_receipt_confirms_and_moves_payloads() {
    let harness = harness();
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    let payload = seed_payload(&harness.store, "PART-A", "S1", Utc::now());

    let uuid = Uuid::new_v4();
    harness
        .ingest(&retrieve_request(uuid, "PART-A", "LINE1-IN"))
        .await;
    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    let vendor_order_id = order.vendor_order_id.clone().unwrap();

    // Robot assignment produces the waybill and an in_transit update.
    harness.fleet.set_state(&vendor_order_id, state::MOVING);
    harness.fleet.assign_robot(&vendor_order_id, "amr-07");
    harness.engine.tracker().tick().await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::InTransit);
    assert_eq!(order.robot_id.as_deref(), Some("amr-07"));
    let waybills = harness.outbox_envelopes(kind::ORDER_WAYBILL);
    assert_eq!(waybills.len(), 1);
    assert_eq!(harness.outbox_envelopes(kind::ORDER_UPDATE).len(), 1);

    // Vendor reports FINISHED: delivered + update + delivered message, entry dropped.
    harness.fleet.set_state(&vendor_order_id, state::FINISHED);
    harness.engine.tracker().tick().await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(harness.outbox_envelopes(kind::ORDER_UPDATE).len(), 2);
    assert_eq!(harness.outbox_envelopes(kind::ORDER_DELIVERED).len(), 1);
    assert!(!harness.engine.tracker().is_tracking(&vendor_order_id));

    // Operator receipt: confirmed, payload handed over to the line.
    let receipt = Envelope::new(
        kind::ORDER_RECEIPT,
        Address::edge("line-01"),
        Address::core("dispatch"),
        serde_json::to_value(OrderReceipt {
            order_uuid: uuid,
            receipt_type: "confirmed".to_string(),
            final_count: 50,
        })
        .unwrap(),
    );
    harness.ingest(&receipt).await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);

    let moved = harness.store.payload(payload.id).unwrap().unwrap();
    assert_eq!(moved.node.as_deref(), Some("LINE1-IN"));
    assert_eq!(moved.status, PayloadStatus::AtLine);
    assert_eq!(moved.claimed_by, None);

    let audit = harness
        .store
        .audit_for("payload", &payload.id.to_string())
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "moved");
}

#[tokio::test]
async fn expired_inbound_is_dropped_without_side_effects() {
    let harness = harness();
    harness.store.upsert_payload_type("PART-A", "").unwrap();
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);

    let uuid = Uuid::new_v4();
    let mut request = retrieve_request(uuid, "PART-A", "LINE1-IN");
    request.exp = Some(Utc::now() - TimeDelta::minutes(1));
    harness.ingest(&request).await;

    assert!(harness.store.order_by_uuid(&uuid).unwrap().is_none());
    assert!(harness.store.pending_outbox(10).unwrap().is_empty());
}

#[tokio::test]
async fn fleet_placement_failure_fails_the_order_and_unclaims() {
    let harness = harness();
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    let payload = seed_payload(&harness.store, "PART-A", "S1", Utc::now());
    harness.fleet.set_fail_placement(true);

    let uuid = Uuid::new_v4();
    harness
        .ingest(&retrieve_request(uuid, "PART-A", "LINE1-IN"))
        .await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.vendor_order_id, None);
    assert_eq!(
        harness.store.payload(payload.id).unwrap().unwrap().claimed_by,
        None
    );

    let errors = harness.outbox_envelopes(kind::ORDER_ERROR);
    assert_eq!(errors.len(), 1);
    let error: OrderError = errors[0].parse_payload().unwrap();
    assert_eq!(error.error_code, ErrorCode::FleetFailed);
    assert!(harness.outbox_envelopes(kind::ORDER_ACK).is_empty());
}

#[tokio::test]
async fn duplicate_request_uuid_results_in_one_order() {
    let harness = harness();
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    seed_payload(&harness.store, "PART-A", "S1", Utc::now());
    seed_payload(&harness.store, "PART-A", "S1", Utc::now());

    let uuid = Uuid::new_v4();
    harness
        .ingest(&retrieve_request(uuid, "PART-A", "LINE1-IN"))
        .await;
    harness
        .ingest(&retrieve_request(uuid, "PART-A", "LINE1-IN"))
        .await;

    assert_eq!(harness.store.active_orders().unwrap().len(), 1);
    assert_eq!(harness.fleet.requests().len(), 1);
    assert_eq!(harness.outbox_envelopes(kind::ORDER_ACK).len(), 1);
}

#[tokio::test]
async fn unknown_order_type_is_answered_without_an_order() {
    let harness = harness();
    let uuid = Uuid::new_v4();
    let mut request = OrderRequest {
        order_uuid: uuid,
        order_type: "teleport".to_string(),
        payload_type_code: String::new(),
        payload_desc: String::new(),
        quantity: 0,
        delivery_node: String::new(),
        pickup_node: String::new(),
        staging_node: String::new(),
        load_type: String::new(),
        priority: 0,
        retrieve_empty: false,
    };
    harness.ingest(&request_envelope(request.clone())).await;

    assert!(harness.store.order_by_uuid(&uuid).unwrap().is_none());
    let errors = harness.outbox_envelopes(kind::ORDER_ERROR);
    assert_eq!(errors.len(), 1);
    let error: OrderError = errors[0].parse_payload().unwrap();
    assert_eq!(error.error_code, ErrorCode::UnknownType);

    // Unknown payload type is also answered before any order exists.
    request.order_uuid = Uuid::new_v4();
    request.order_type = "retrieve".to_string();
    request.payload_type_code = "UNSEEN".to_string();
    harness.ingest(&request_envelope(request.clone())).await;

    assert!(harness
        .store
        .order_by_uuid(&request.order_uuid)
        .unwrap()
        .is_none());
    let errors = harness.outbox_envelopes(kind::ORDER_ERROR);
    assert_eq!(errors.len(), 2);
    let error: OrderError = errors[1].parse_payload().unwrap();
    assert_eq!(error.error_code, ErrorCode::PayloadTypeError);
}

#[tokio::test]
async fn store_order_prefers_consolidation_then_emptiest() {
    let harness = harness();
    seed_node(&harness.store, "LINE1-OUT", NodeType::LineSide, 2);
    seed_node(&harness.store, "S1", NodeType::Storage, 4);
    seed_node(&harness.store, "S2", NodeType::Storage, 4);
    // S1 already holds a PART-A payload plus one other; S2 is emptier.
    seed_payload(&harness.store, "PART-A", "S1", Utc::now());
    seed_payload(&harness.store, "PART-B", "S1", Utc::now());

    let request = OrderRequest {
        order_uuid: Uuid::new_v4(),
        order_type: "store".to_string(),
        payload_type_code: "PART-A".to_string(),
        payload_desc: "full tote".to_string(),
        quantity: 1,
        delivery_node: String::new(),
        pickup_node: "LINE1-OUT".to_string(),
        staging_node: String::new(),
        load_type: String::new(),
        priority: 0,
        retrieve_empty: false,
    };
    harness.ingest(&request_envelope(request.clone())).await;

    let order = harness
        .store
        .order_by_uuid(&request.order_uuid)
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Dispatched);
    // Consolidation: S1 already holds the type.
    assert_eq!(order.delivery_node.as_deref(), Some("S1"));
    assert_eq!(order.pickup_node.as_deref(), Some("LINE1-OUT"));

    // Without a matching type anywhere, the emptiest open node wins.
    harness.store.upsert_payload_type("PART-C", "").unwrap();
    let fallback = OrderRequest {
        order_uuid: Uuid::new_v4(),
        payload_type_code: "PART-C".to_string(),
        ..request
    };
    harness.ingest(&request_envelope(fallback.clone())).await;
    let order = harness
        .store
        .order_by_uuid(&fallback.order_uuid)
        .unwrap()
        .unwrap();
    assert_eq!(order.delivery_node.as_deref(), Some("S2"));
}

#[tokio::test]
async fn storage_waybill_dispatches_a_store_order() {
    let harness = harness();
    seed_node(&harness.store, "LINE1-OUT", NodeType::LineSide, 2);
    seed_node(&harness.store, "S1", NodeType::Storage, 4);

    let uuid = Uuid::new_v4();
    let waybill = Envelope::new(
        kind::ORDER_STORAGE_WAYBILL,
        Address::edge("line-01"),
        Address::core("dispatch"),
        serde_json::to_value(OrderStorageWaybill {
            order_uuid: uuid,
            order_type: "store".to_string(),
            payload_desc: "finished goods".to_string(),
            pickup_node: "LINE1-OUT".to_string(),
            final_count: 48,
        })
        .unwrap(),
    );
    harness.ingest(&waybill).await;

    let order = harness.store.order_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Dispatched);
    assert_eq!(order.pickup_node.as_deref(), Some("LINE1-OUT"));
    assert_eq!(order.delivery_node.as_deref(), Some("S1"));
    assert_eq!(harness.outbox_envelopes(kind::ORDER_ACK).len(), 1);
}

#[tokio::test]
async fn move_without_payload_at_pickup_fails_with_no_payload() {
    let harness = harness();
    seed_node(&harness.store, "STAGE-1", NodeType::Staging, 4);
    seed_node(&harness.store, "LINE1-IN", NodeType::LineSide, 2);
    harness.store.upsert_payload_type("PART-A", "").unwrap();

    let request = OrderRequest {
        order_uuid: Uuid::new_v4(),
        order_type: "move".to_string(),
        payload_type_code: "PART-A".to_string(),
        payload_desc: String::new(),
        quantity: 1,
        delivery_node: "LINE1-IN".to_string(),
        pickup_node: "STAGE-1".to_string(),
        staging_node: String::new(),
        load_type: String::new(),
        priority: 0,
        retrieve_empty: false,
    };
    harness.ingest(&request_envelope(request.clone())).await;

    let order = harness
        .store
        .order_by_uuid(&request.order_uuid)
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    let errors = harness.outbox_envelopes(kind::ORDER_ERROR);
    let error: OrderError = errors[0].parse_payload().unwrap();
    assert_eq!(error.error_code, ErrorCode::NoPayload);
}
