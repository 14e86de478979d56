//! The order state machine.
//!
//! The dispatcher owns the per-order lifecycle: it resolves payload types and
//! nodes, selects sources and destinations, claims payloads (the store
//! arbitrates), places transport orders with the fleet and enqueues every
//! outbound reply through the outbox. Validation and resource-contention
//! failures transition the order to `failed` and answer with the matching
//! `order.error` code; a bad request never takes the ingest loop down.

use crate::{
    bus::EventBus,
    error::EngineError,
    event::{OrderCancelled, OrderCompleted, OrderDispatched, OrderFailed, OrderReceived},
    ingest::MessageHandler,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use shingo_fleet::{FleetAdapter, FleetError, TransportOrderRequest};
use shingo_store::{
    error::StoreError,
    node::Node,
    order::{DispatchBinding, NewOrder, Order, OrderStatus, OrderType},
    outbox::NewOutboxMessage,
    payload::{Payload, PayloadStatus, PayloadType},
    Store,
};
use shingo_wire::{
    envelope::{Address, Envelope},
    kind,
    message::{
        EdgeHeartbeat, EdgeHeartbeatAck, EdgeRegister, EdgeRegistered, ErrorCode, OrderAck,
        OrderCancel, OrderError, OrderReceipt, OrderRedirect, OrderRequest, OrderStorageWaybill,
        ProductionReport,
    },
    subject,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Build a vendor order id embedding the internal order id, eg/ `sg-42-9f21ab04`.
fn vendor_order_id(order_id: i64) -> String {
    let suffix: u32 = rand::rng().random();
    format!("sg-{order_id}-{suffix:08x}")
}

pub struct Dispatcher {
    station: String,
    dispatch_topic: String,
    fleet_timeout: Duration,
    store: Store,
    fleet: Arc<dyn FleetAdapter>,
    events: Arc<EventBus>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("station", &self.station)
            .field("fleet", &self.fleet.name())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        station: impl Into<String>,
        dispatch_topic: impl Into<String>,
        fleet_timeout: Duration,
        store: Store,
        fleet: Arc<dyn FleetAdapter>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            station: station.into(),
            dispatch_topic: dispatch_topic.into(),
            fleet_timeout,
            store,
            fleet,
            events,
        }
    }

    fn core_address(&self) -> Address {
        Address::core(self.station.clone())
    }

    /// Outbound reply correlated to an inbound envelope.
    pub fn outbox_reply(
        &self,
        original: &Envelope,
        message_kind: &str,
        payload: serde_json::Value,
    ) -> Result<NewOutboxMessage, EngineError> {
        let envelope = Envelope::reply_to(original, message_kind, self.core_address(), payload);
        Ok(NewOutboxMessage {
            topic: self.dispatch_topic.clone(),
            payload: envelope.encode()?,
            event_type: message_kind.to_string(),
            station: original.src.station.clone(),
        })
    }

    /// Outbound message addressed to a station, not correlated to anything.
    pub fn outbox_to_station(
        &self,
        station: &str,
        message_kind: &str,
        payload: serde_json::Value,
    ) -> Result<NewOutboxMessage, EngineError> {
        let envelope = Envelope::new(
            message_kind,
            self.core_address(),
            Address::edge(station),
            payload,
        );
        Ok(NewOutboxMessage {
            topic: self.dispatch_topic.clone(),
            payload: envelope.encode()?,
            event_type: message_kind.to_string(),
            station: station.to_string(),
        })
    }

    /// Outbound `data` reply (subject-based) correlated to an inbound envelope.
    fn data_reply(
        &self,
        original: &Envelope,
        data_subject: &str,
        data: serde_json::Value,
    ) -> Result<NewOutboxMessage, EngineError> {
        let mut envelope = Envelope::data(
            data_subject,
            self.core_address(),
            original.src.clone(),
            data,
        );
        envelope.cor = Some(original.id);
        Ok(NewOutboxMessage {
            topic: self.dispatch_topic.clone(),
            payload: envelope.encode()?,
            event_type: data_subject.to_string(),
            station: original.src.station.clone(),
        })
    }

    fn error_reply(
        &self,
        original: &Envelope,
        order_uuid: Uuid,
        error_code: ErrorCode,
        detail: &str,
    ) -> Result<NewOutboxMessage, EngineError> {
        self.outbox_reply(
            original,
            kind::ORDER_ERROR,
            serde_json::to_value(OrderError {
                order_uuid,
                error_code,
                detail: detail.to_string(),
            })?,
        )
    }

    /// Fail an order: terminal transition + `order.error` reply in one
    /// transaction, claims released, `OrderFailed` emitted.
    fn fail_order(
        &self,
        original: &Envelope,
        order: &Order,
        error_code: ErrorCode,
        detail: &str,
    ) -> Result<(), EngineError> {
        warn!(order = order.id, code = %error_code, detail, "order failed");
        let reply = self.error_reply(original, order.uuid, error_code, detail)?;
        self.store
            .update_order_status_with_outbox(order.id, OrderStatus::Failed, detail, reply)?;
        self.store.unclaim_for_order(order.id)?;
        self.events.emit(OrderFailed {
            order_id: order.id,
            uuid: order.uuid,
            station: order.station.clone(),
            code: error_code,
            detail: detail.to_string(),
        });
        Ok(())
    }

    // --- selection rules -------------------------------------------------

    /// FIFO source selection: among available, unclaimed payloads of the
    /// requested type sitting on enabled storage nodes, the one that has been
    /// in storage the longest.
    fn select_source(
        &self,
        payload_type_id: i64,
        wanted_status: PayloadStatus,
    ) -> Result<Option<Payload>, EngineError> {
        let storage: HashSet<String> = self
            .store
            .storage_nodes()?
            .into_iter()
            .map(|node| node.name)
            .collect();

        Ok(self
            .store
            .payloads()?
            .into_iter()
            .filter(|payload| payload.payload_type_id == payload_type_id)
            .filter(|payload| payload.status == wanted_status && payload.claimed_by.is_none())
            .filter(|payload| {
                payload
                    .node
                    .as_ref()
                    .is_some_and(|node| storage.contains(node))
            })
            .min_by_key(|payload| {
                payload
                    .delivered_at
                    .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
            }))
    }

    /// Destination selection for store orders, two passes over enabled
    /// storage nodes with free capacity: consolidation first (a node already
    /// holding the type, most matching payloads wins), emptiest second.
    fn select_storage_destination(
        &self,
        payload_type_id: Option<i64>,
    ) -> Result<Option<Node>, EngineError> {
        let mut open: Vec<(Node, Vec<Payload>)> = Vec::new();
        for node in self.store.storage_nodes()? {
            let payloads = self.store.payloads_at_node(&node.name)?;
            if (payloads.len() as u32) < node.capacity {
                open.push((node, payloads));
            }
        }

        if let Some(type_id) = payload_type_id {
            let consolidation = open
                .iter()
                .map(|(node, payloads)| {
                    let matching = payloads
                        .iter()
                        .filter(|payload| payload.payload_type_id == type_id)
                        .count();
                    (node, matching)
                })
                .filter(|(_, matching)| *matching > 0)
                .max_by_key(|(_, matching)| *matching);
            if let Some((node, _)) = consolidation {
                return Ok(Some(node.clone()));
            }
        }

        Ok(open
            .into_iter()
            .min_by_key(|(_, payloads)| payloads.len())
            .map(|(node, _)| node))
    }

    // --- placement -------------------------------------------------------

    async fn place_with_fleet(
        &self,
        original: &Envelope,
        order: &Order,
        pickup: &Node,
        delivery: &Node,
    ) -> Result<(), EngineError> {
        let request = TransportOrderRequest::new(
            vendor_order_id(order.id),
            order.id,
            order.uuid,
            pickup.vendor_location.clone(),
            delivery.vendor_location.clone(),
            order.priority,
        );

        let placed = match tokio::time::timeout(
            self.fleet_timeout,
            self.fleet.create_transport_order(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FleetError::Connectivity(format!(
                "placement timed out after {:?}",
                self.fleet_timeout
            ))),
        };

        let result = match placed {
            Ok(result) => result,
            Err(err) => {
                return self.fail_order(
                    original,
                    order,
                    ErrorCode::FleetFailed,
                    &format!("fleet placement failed: {err}"),
                );
            }
        };

        let ack = self.outbox_reply(
            original,
            kind::ORDER_ACK,
            serde_json::to_value(OrderAck {
                order_uuid: order.uuid,
                shingo_order_id: order.id,
                source_node: pickup.name.clone(),
            })?,
        )?;
        let previous_vendor_order_id = order.vendor_order_id.clone();
        let (updated, _) = self.store.record_dispatch(
            order.id,
            DispatchBinding {
                vendor_order_id: result.vendor_order_id.clone(),
                vendor_state: result.state.clone(),
                pickup_node: Some(pickup.name.clone()),
                delivery_node: Some(delivery.name.clone()),
            },
            ack,
        )?;

        info!(
            order = order.id,
            vendor = %result.vendor_order_id,
            from = %pickup.name,
            to = %delivery.name,
            "order dispatched"
        );
        self.events.emit(OrderDispatched {
            order_id: updated.id,
            uuid: updated.uuid,
            station: updated.station,
            vendor_order_id: result.vendor_order_id,
            vendor_state: result.state,
            previous_vendor_order_id,
        });
        Ok(())
    }

    async fn cancel_with_fleet(&self, order: &Order) {
        let Some(vendor_id) = &order.vendor_order_id else {
            return;
        };
        let cancelled = match tokio::time::timeout(self.fleet_timeout, self.fleet.cancel_order(vendor_id))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FleetError::Connectivity("cancel timed out".to_string())),
        };
        // Best effort: the vendor may already have finished or lost the order.
        if let Err(err) = cancelled {
            warn!(order = order.id, vendor = %vendor_id, %err, "fleet cancel failed");
        }
    }

    // --- order type branches ---------------------------------------------

    async fn dispatch_retrieve(
        &self,
        original: &Envelope,
        order: &Order,
        request: &OrderRequest,
        payload_type: Option<PayloadType>,
    ) -> Result<(), EngineError> {
        self.store
            .update_order_status(order.id, OrderStatus::Sourcing, "selecting source payload")?;

        let Some(payload_type) = payload_type else {
            return self.fail_order(
                original,
                order,
                ErrorCode::NoSource,
                "no payload type requested",
            );
        };
        let wanted_status = if request.retrieve_empty {
            PayloadStatus::Empty
        } else {
            PayloadStatus::Available
        };
        let Some(source) = self.select_source(payload_type.id, wanted_status)? else {
            return self.fail_order(
                original,
                order,
                ErrorCode::NoSource,
                &format!("no available payload for type {}", payload_type.code),
            );
        };

        match self.store.claim_payload(source.id, order.id) {
            Ok(_) => {}
            Err(StoreError::ClaimConflict { .. }) => {
                return self.fail_order(
                    original,
                    order,
                    ErrorCode::ClaimFailed,
                    "source payload claim lost",
                );
            }
            Err(err) => return Err(err.into()),
        }
        self.store.set_order_payload(order.id, source.id)?;

        let pickup_name = source.node.clone().unwrap_or_default();
        let Some(pickup) = self.store.node(&pickup_name)? else {
            return self.fail_order(
                original,
                order,
                ErrorCode::NodeError,
                &format!("source node {pickup_name} is not registered"),
            );
        };
        self.store.set_order_pickup(order.id, &pickup.name)?;

        if request.delivery_node.is_empty() {
            return self.fail_order(
                original,
                order,
                ErrorCode::InvalidNode,
                "delivery node required",
            );
        }
        let Some(delivery) = self.store.node(&request.delivery_node)? else {
            return self.fail_order(
                original,
                order,
                ErrorCode::InvalidNode,
                &format!("unknown delivery node {}", request.delivery_node),
            );
        };

        self.place_with_fleet(original, order, &pickup, &delivery).await
    }

    async fn dispatch_move(
        &self,
        original: &Envelope,
        order: &Order,
        request: &OrderRequest,
        payload_type: Option<PayloadType>,
    ) -> Result<(), EngineError> {
        if request.pickup_node.is_empty() {
            return self.fail_order(
                original,
                order,
                ErrorCode::MissingPickup,
                "move requires a pickup node",
            );
        }
        let Some(pickup) = self.store.node(&request.pickup_node)? else {
            return self.fail_order(
                original,
                order,
                ErrorCode::InvalidNode,
                &format!("unknown pickup node {}", request.pickup_node),
            );
        };

        if let Some(payload_type) = payload_type {
            let candidate = self
                .store
                .payloads_at_node(&pickup.name)?
                .into_iter()
                .find(|payload| {
                    payload.payload_type_id == payload_type.id && payload.claimed_by.is_none()
                });
            let Some(candidate) = candidate else {
                return self.fail_order(
                    original,
                    order,
                    ErrorCode::NoPayload,
                    &format!("no unclaimed {} payload at {}", payload_type.code, pickup.name),
                );
            };
            match self.store.claim_payload(candidate.id, order.id) {
                Ok(_) => self.store.set_order_payload(order.id, candidate.id).map(|_| ())?,
                Err(StoreError::ClaimConflict { .. }) => {
                    return self.fail_order(
                        original,
                        order,
                        ErrorCode::ClaimFailed,
                        "payload claim lost",
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        if request.delivery_node.is_empty() {
            return self.fail_order(
                original,
                order,
                ErrorCode::InvalidNode,
                "delivery node required",
            );
        }
        let Some(delivery) = self.store.node(&request.delivery_node)? else {
            return self.fail_order(
                original,
                order,
                ErrorCode::InvalidNode,
                &format!("unknown delivery node {}", request.delivery_node),
            );
        };

        self.place_with_fleet(original, order, &pickup, &delivery).await
    }

    async fn dispatch_store(
        &self,
        original: &Envelope,
        order: &Order,
        request: &OrderRequest,
        payload_type: Option<PayloadType>,
    ) -> Result<(), EngineError> {
        self.store.update_order_status(
            order.id,
            OrderStatus::Sourcing,
            "selecting storage destination",
        )?;

        let Some(destination) =
            self.select_storage_destination(payload_type.as_ref().map(|pt| pt.id))?
        else {
            return self.fail_order(
                original,
                order,
                ErrorCode::NoStorage,
                "no storage node with free capacity",
            );
        };

        // Line side to storage: the explicit pickup wins, otherwise the
        // request's delivery node is where the payload currently sits.
        let pickup_name = if !request.pickup_node.is_empty() {
            request.pickup_node.clone()
        } else if !request.delivery_node.is_empty() {
            request.delivery_node.clone()
        } else {
            return self.fail_order(
                original,
                order,
                ErrorCode::MissingPickup,
                "store requires a pickup node",
            );
        };
        let Some(pickup) = self.store.node(&pickup_name)? else {
            return self.fail_order(
                original,
                order,
                ErrorCode::InvalidNode,
                &format!("unknown pickup node {pickup_name}"),
            );
        };

        self.place_with_fleet(original, order, &pickup, &destination).await
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn on_order_request(
        &self,
        envelope: &Envelope,
        request: OrderRequest,
    ) -> Result<(), EngineError> {
        let Some(order_type) = OrderType::from_wire(&request.order_type) else {
            warn!(uuid = %request.order_uuid, order_type = %request.order_type, "unknown order type");
            self.store.enqueue_outbox(self.error_reply(
                envelope,
                request.order_uuid,
                ErrorCode::UnknownType,
                &format!("unknown order type {}", request.order_type),
            )?)?;
            return Ok(());
        };

        let payload_type = if request.payload_type_code.is_empty() {
            None
        } else {
            match self.store.payload_type_by_code(&request.payload_type_code)? {
                Some(payload_type) => Some(payload_type),
                None => {
                    self.store.enqueue_outbox(self.error_reply(
                        envelope,
                        request.order_uuid,
                        ErrorCode::PayloadTypeError,
                        &format!("unknown payload type {}", request.payload_type_code),
                    )?)?;
                    return Ok(());
                }
            }
        };

        if !request.delivery_node.is_empty() && self.store.node(&request.delivery_node)?.is_none() {
            self.store.enqueue_outbox(self.error_reply(
                envelope,
                request.order_uuid,
                ErrorCode::InvalidNode,
                &format!("unknown delivery node {}", request.delivery_node),
            )?)?;
            return Ok(());
        }

        let order = match self.store.insert_order(
            NewOrder {
                uuid: request.order_uuid,
                station: envelope.src.station.clone(),
                order_type,
                payload_type_id: payload_type.as_ref().map(|pt| pt.id),
                pickup_node: (!request.pickup_node.is_empty()).then(|| request.pickup_node.clone()),
                delivery_node: (!request.delivery_node.is_empty())
                    .then(|| request.delivery_node.clone()),
                priority: request.priority,
                description: request.payload_desc.clone(),
            },
            "order received",
        ) {
            Ok(order) => order,
            Err(StoreError::DuplicateUuid(uuid)) => {
                // One-or-none: the first request won, this is a replay.
                debug!(%uuid, "duplicate order request dropped");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        info!(order = order.id, uuid = %order.uuid, %order_type, station = %order.station, "order received");
        self.events.emit(OrderReceived::new(
            order.id,
            order.uuid,
            order.station.clone(),
            order.order_type,
        ));

        match order_type {
            OrderType::Retrieve => {
                self.dispatch_retrieve(envelope, &order, &request, payload_type)
                    .await
            }
            OrderType::Move => {
                self.dispatch_move(envelope, &order, &request, payload_type)
                    .await
            }
            OrderType::Store => {
                self.dispatch_store(envelope, &order, &request, payload_type)
                    .await
            }
        }
    }

    async fn on_order_cancel(
        &self,
        envelope: &Envelope,
        cancel: OrderCancel,
    ) -> Result<(), EngineError> {
        let Some(order) = self.store.order_by_uuid(&cancel.order_uuid)? else {
            warn!(uuid = %cancel.order_uuid, "cancel for unknown order");
            return Ok(());
        };
        if order.status.is_terminal() {
            debug!(order = order.id, status = %order.status, "cancel for terminal order ignored");
            return Ok(());
        }

        self.cancel_with_fleet(&order).await;
        self.store.unclaim_for_order(order.id)?;

        let reply = self.outbox_reply(
            envelope,
            kind::ORDER_CANCELLED,
            serde_json::to_value(shingo_wire::message::OrderCancelled {
                order_uuid: order.uuid,
                reason: cancel.reason.clone(),
            })?,
        )?;
        self.store.update_order_status_with_outbox(
            order.id,
            OrderStatus::Cancelled,
            &cancel.reason,
            reply,
        )?;

        info!(order = order.id, reason = %cancel.reason, "order cancelled");
        self.events.emit(OrderCancelled {
            order_id: order.id,
            uuid: order.uuid,
            station: order.station,
            reason: cancel.reason,
        });
        Ok(())
    }

    async fn on_order_receipt(
        &self,
        _envelope: &Envelope,
        receipt: OrderReceipt,
    ) -> Result<(), EngineError> {
        let Some(order) = self.store.order_by_uuid(&receipt.order_uuid)? else {
            warn!(uuid = %receipt.order_uuid, "receipt for unknown order");
            return Ok(());
        };
        if order.status.is_terminal() {
            debug!(order = order.id, status = %order.status, "receipt for terminal order ignored");
            return Ok(());
        }

        let detail = format!(
            "receipt {}: final count {}",
            receipt.receipt_type, receipt.final_count
        );
        self.store
            .update_order_status(order.id, OrderStatus::Confirmed, &detail)?;

        info!(order = order.id, %detail, "order confirmed");
        self.events
            .emit(OrderCompleted::new(order.id, order.uuid, order.station));
        Ok(())
    }

    async fn on_order_redirect(
        &self,
        envelope: &Envelope,
        redirect: OrderRedirect,
    ) -> Result<(), EngineError> {
        let Some(order) = self.store.order_by_uuid(&redirect.order_uuid)? else {
            warn!(uuid = %redirect.order_uuid, "redirect for unknown order");
            return Ok(());
        };
        if order.status.is_terminal() {
            debug!(order = order.id, status = %order.status, "redirect for terminal order ignored");
            return Ok(());
        }

        self.cancel_with_fleet(&order).await;

        let Some(delivery) = self.store.node(&redirect.new_delivery_node)? else {
            self.store.enqueue_outbox(self.error_reply(
                envelope,
                order.uuid,
                ErrorCode::InvalidNode,
                &format!("unknown delivery node {}", redirect.new_delivery_node),
            )?)?;
            return Ok(());
        };

        let pickup = match &order.pickup_node {
            Some(name) => self.store.node(name)?,
            None => None,
        };
        let Some(pickup) = pickup else {
            self.store.enqueue_outbox(self.error_reply(
                envelope,
                order.uuid,
                ErrorCode::RedirectFailed,
                "pickup node no longer known",
            )?)?;
            return Ok(());
        };

        self.store.update_order_status(
            order.id,
            OrderStatus::Sourcing,
            &format!("redirect to {}", delivery.name),
        )?;

        info!(order = order.id, to = %delivery.name, "order redirected");
        self.place_with_fleet(envelope, &order, &pickup, &delivery).await
    }

    async fn on_storage_waybill(
        &self,
        envelope: &Envelope,
        waybill: OrderStorageWaybill,
    ) -> Result<(), EngineError> {
        // A storage waybill is a store request in waybill clothing.
        let request = OrderRequest {
            order_uuid: waybill.order_uuid,
            order_type: "store".to_string(),
            payload_type_code: String::new(),
            payload_desc: waybill.payload_desc,
            quantity: waybill.final_count.max(0) as u32,
            delivery_node: String::new(),
            pickup_node: waybill.pickup_node,
            staging_node: String::new(),
            load_type: String::new(),
            priority: 0,
            retrieve_empty: false,
        };
        self.on_order_request(envelope, request).await
    }

    async fn on_edge_register(
        &self,
        envelope: &Envelope,
        register: EdgeRegister,
    ) -> Result<(), EngineError> {
        let station = self.store.register_edge(
            &register.station_id,
            &register.hostname,
            &register.version,
            &register.line_ids,
        )?;
        info!(station = %station.station_id, hostname = %station.hostname, "edge registered");

        let reply = self.data_reply(
            envelope,
            subject::EDGE_REGISTERED,
            serde_json::to_value(EdgeRegistered {
                station_id: register.station_id,
                message: String::new(),
            })?,
        )?;
        self.store.enqueue_outbox(reply)?;
        Ok(())
    }

    async fn on_edge_heartbeat(
        &self,
        envelope: &Envelope,
        heartbeat: EdgeHeartbeat,
    ) -> Result<(), EngineError> {
        self.store
            .record_heartbeat(&heartbeat.station_id, heartbeat.active_orders)?;

        let reply = self.data_reply(
            envelope,
            subject::EDGE_HEARTBEAT_ACK,
            serde_json::to_value(EdgeHeartbeatAck {
                station_id: heartbeat.station_id,
                server_ts: Utc::now(),
            })?,
        )?;
        self.store.enqueue_outbox(reply)?;
        Ok(())
    }

    async fn on_production_report(
        &self,
        _envelope: &Envelope,
        report: ProductionReport,
    ) -> Result<(), EngineError> {
        for tally in &report.reports {
            let total = self
                .store
                .add_production(&report.station_id, &tally.cat_id, tally.count)?;
            debug!(station = %report.station_id, cat = %tally.cat_id, total, "production tally");
        }
        self.store.append_audit(
            "production",
            &report.station_id,
            "report",
            &format!("{} categories", report.reports.len()),
        )?;
        Ok(())
    }
}
