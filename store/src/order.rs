//! Orders, the status machine and transactional order/outbox writes.
//!
//! Every write that changes an order's status also appends an
//! [`OrderHistoryRow`] in the same transaction, and the variants taking a
//! [`NewOutboxMessage`] commit the outbound reply together with the state
//! change so a reader never observes one without the other.

use crate::{
    error::StoreError,
    keys,
    outbox::{self, NewOutboxMessage, OutboxMessage},
    store::{abort, tx_decode, tx_encode, unwrap_tx, Store},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use uuid::Uuid;

/// Kind of movement an order requests.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[display("retrieve")]
    Retrieve,
    #[display("move")]
    Move,
    #[display("store")]
    Store,
}

impl OrderType {
    /// Parse the wire spelling. Unknown spellings are a caller-level
    /// `unknown_type` failure, not a decode error.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "retrieve" => Some(Self::Retrieve),
            "move" => Some(Self::Move),
            "store" => Some(Self::Store),
            _ => None,
        }
    }
}

/// Canonical order lifecycle states.
///
/// `confirmed`, `failed` and `cancelled` are terminal. `sourcing` is
/// re-enterable from any live state because a redirect re-sources an
/// in-flight order; everything else only moves forward.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[display("pending")]
    Pending,
    #[display("sourcing")]
    Sourcing,
    #[display("submitted")]
    Submitted,
    #[display("acknowledged")]
    Acknowledged,
    #[display("dispatched")]
    Dispatched,
    #[display("in_transit")]
    InTransit,
    #[display("delivered")]
    Delivered,
    #[display("confirmed")]
    Confirmed,
    #[display("failed")]
    Failed,
    #[display("cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sourcing => 1,
            Self::Submitted => 2,
            Self::Acknowledged => 3,
            Self::Dispatched => 4,
            Self::InTransit => 5,
            Self::Delivered => 6,
            Self::Confirmed => 7,
            Self::Failed | Self::Cancelled => 8,
        }
    }

    /// Whether a transition from `self` to `to` is legal.
    pub fn allows(&self, to: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            OrderStatus::Failed | OrderStatus::Cancelled => true,
            OrderStatus::Sourcing => true,
            _ => to.rank() > self.rank(),
        }
    }
}

/// Persisted order record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub uuid: Uuid,
    pub station: String,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub payload_type_id: Option<i64>,
    pub payload_id: Option<i64>,
    pub pickup_node: Option<String>,
    pub delivery_node: Option<String>,
    pub vendor_order_id: Option<String>,
    pub vendor_state: Option<String>,
    pub robot_id: Option<String>,
    pub priority: i32,
    pub description: String,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Attributes of a new order, copied from the inbound request.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub uuid: Uuid,
    pub station: String,
    pub order_type: OrderType,
    pub payload_type_id: Option<i64>,
    pub pickup_node: Option<String>,
    pub delivery_node: Option<String>,
    pub priority: i32,
    pub description: String,
}

/// One row per status transition, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHistoryRow {
    pub order_id: i64,
    pub status: OrderStatus,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Vendor binding recorded when an order is placed with the fleet.
#[derive(Debug, Clone)]
pub struct DispatchBinding {
    pub vendor_order_id: String,
    pub vendor_state: String,
    pub pickup_node: Option<String>,
    pub delivery_node: Option<String>,
}

fn transition(order: &mut Order, to: OrderStatus, detail: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
    if order.status.is_terminal() || order.completed_at.is_some() {
        return Err(StoreError::Terminal {
            order: order.id,
            to,
        });
    }
    if !order.status.allows(to) {
        return Err(StoreError::InvalidTransition {
            order: order.id,
            from: order.status,
            to,
        });
    }
    order.status = to;
    order.updated_at = now;
    if to.is_terminal() {
        order.completed_at = Some(now);
    }
    if to == OrderStatus::Failed {
        order.error_detail = Some(detail.to_string());
    }
    Ok(())
}

impl Store {
    /// Insert a new order in status `pending` together with its initial
    /// history row. A duplicate caller UUID is rejected so at most one order
    /// ever exists per request.
    pub fn insert_order(&self, new: NewOrder, detail: &str) -> Result<Order, StoreError> {
        let id = self.next_id()?;
        let history_seq = self.next_id()? as u64;
        let now = Utc::now();

        let order = Order {
            id,
            uuid: new.uuid,
            station: new.station,
            order_type: new.order_type,
            status: OrderStatus::Pending,
            payload_type_id: new.payload_type_id,
            payload_id: None,
            pickup_node: new.pickup_node,
            delivery_node: new.delivery_node,
            vendor_order_id: None,
            vendor_state: None,
            robot_id: None,
            priority: new.priority,
            description: new.description,
            error_detail: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let history = OrderHistoryRow {
            order_id: id,
            status: OrderStatus::Pending,
            detail: detail.to_string(),
            at: now,
        };

        unwrap_tx(self.tree().transaction(|tx| {
            if tx.get(keys::order_uuid(&order.uuid))?.is_some() {
                return abort(StoreError::DuplicateUuid(order.uuid));
            }
            tx.insert(keys::order(id), tx_encode(&order)?)?;
            tx.insert(keys::order_uuid(&order.uuid), id.to_be_bytes().to_vec())?;
            tx.insert(keys::history(id, history_seq), tx_encode(&history)?)?;
            Ok(())
        }))?;

        Ok(order)
    }

    pub fn order(&self, id: i64) -> Result<Option<Order>, StoreError> {
        self.get(&keys::order(id))
    }

    pub fn order_by_uuid(&self, uuid: &Uuid) -> Result<Option<Order>, StoreError> {
        match self.tree().get(keys::order_uuid(uuid))? {
            Some(id_bytes) => self.get(&[keys::ORDER.as_bytes(), id_bytes.as_ref()].concat()),
            None => Ok(None),
        }
    }

    pub fn order_by_vendor_id(&self, vendor_order_id: &str) -> Result<Option<Order>, StoreError> {
        match self.tree().get(keys::order_vendor(vendor_order_id))? {
            Some(id_bytes) => self.get(&[keys::ORDER.as_bytes(), id_bytes.as_ref()].concat()),
            None => Ok(None),
        }
    }

    /// All orders that have not reached a terminal status, id order.
    pub fn active_orders(&self) -> Result<Vec<Order>, StoreError> {
        let orders: Vec<Order> = self.scan(keys::ORDER)?;
        Ok(orders
            .into_iter()
            .filter(|order| !order.status.is_terminal())
            .collect())
    }

    pub fn order_history(&self, order_id: i64) -> Result<Vec<OrderHistoryRow>, StoreError> {
        self.scan(keys::history_prefix(order_id))
    }

    /// Transition an order, appending the history row atomically.
    pub fn update_order_status(
        &self,
        id: i64,
        to: OrderStatus,
        detail: &str,
    ) -> Result<Order, StoreError> {
        self.write_order_transition(id, to, detail, None)
    }

    /// Transition an order and enqueue an outbound reply in one transaction.
    pub fn update_order_status_with_outbox(
        &self,
        id: i64,
        to: OrderStatus,
        detail: &str,
        reply: NewOutboxMessage,
    ) -> Result<(Order, OutboxMessage), StoreError> {
        let (order, sent) = self.write_order_transition_inner(id, to, detail, Some(reply))?;
        let message = sent.ok_or_else(|| StoreError::not_found("outbox", id))?;
        Ok((order, message))
    }

    fn write_order_transition(
        &self,
        id: i64,
        to: OrderStatus,
        detail: &str,
        reply: Option<NewOutboxMessage>,
    ) -> Result<Order, StoreError> {
        Ok(self.write_order_transition_inner(id, to, detail, reply)?.0)
    }

    fn write_order_transition_inner(
        &self,
        id: i64,
        to: OrderStatus,
        detail: &str,
        reply: Option<NewOutboxMessage>,
    ) -> Result<(Order, Option<OutboxMessage>), StoreError> {
        let history_seq = self.next_id()? as u64;
        let outbox_id = match reply {
            Some(_) => Some(self.next_id()?),
            None => None,
        };

        unwrap_tx(self.tree().transaction(|tx| {
            let now = Utc::now();
            let bytes = match tx.get(keys::order(id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("order", id)),
            };
            let mut order: Order = tx_decode(&bytes)?;
            if let Err(err) = transition(&mut order, to, detail, now) {
                return Err(ConflictableTransactionError::Abort(err));
            }

            let history = OrderHistoryRow {
                order_id: id,
                status: to,
                detail: detail.to_string(),
                at: now,
            };

            tx.insert(keys::order(id), tx_encode(&order)?)?;
            tx.insert(keys::history(id, history_seq), tx_encode(&history)?)?;

            let message = match (&reply, outbox_id) {
                (Some(new), Some(outbox_id)) => {
                    Some(outbox::tx_enqueue(tx, outbox_id, new, now)?)
                }
                _ => None,
            };

            Ok((order, message))
        }))
    }

    /// Record a successful fleet placement: vendor binding, transition to
    /// `dispatched` and the `order.ack` reply, all in one transaction.
    ///
    /// A redirect re-binds the order to a new vendor id; the old vendor index
    /// entry is dropped so lookups never resolve a cancelled placement.
    pub fn record_dispatch(
        &self,
        id: i64,
        binding: DispatchBinding,
        ack: NewOutboxMessage,
    ) -> Result<(Order, OutboxMessage), StoreError> {
        let history_seq = self.next_id()? as u64;
        let outbox_id = self.next_id()?;

        unwrap_tx(self.tree().transaction(|tx| {
            let now = Utc::now();
            let bytes = match tx.get(keys::order(id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("order", id)),
            };
            let mut order: Order = tx_decode(&bytes)?;
            if let Err(err) = transition(&mut order, OrderStatus::Dispatched, "placed with fleet", now) {
                return Err(ConflictableTransactionError::Abort(err));
            }

            if let Some(previous) = order.vendor_order_id.take() {
                if previous != binding.vendor_order_id {
                    tx.remove(keys::order_vendor(&previous))?;
                }
            }
            order.vendor_order_id = Some(binding.vendor_order_id.clone());
            order.vendor_state = Some(binding.vendor_state.clone());
            if binding.pickup_node.is_some() {
                order.pickup_node = binding.pickup_node.clone();
            }
            if binding.delivery_node.is_some() {
                order.delivery_node = binding.delivery_node.clone();
            }

            let history = OrderHistoryRow {
                order_id: id,
                status: OrderStatus::Dispatched,
                detail: format!("vendor order {}", binding.vendor_order_id),
                at: now,
            };

            tx.insert(keys::order(id), tx_encode(&order)?)?;
            tx.insert(
                keys::order_vendor(&binding.vendor_order_id),
                id.to_be_bytes().to_vec(),
            )?;
            tx.insert(keys::history(id, history_seq), tx_encode(&history)?)?;
            let message = outbox::tx_enqueue(tx, outbox_id, &ack, now)?;

            Ok((order, message))
        }))
    }

    /// Load-mutate-store an order without a status transition.
    fn update_order<F>(&self, id: i64, mutate: F) -> Result<Order, StoreError>
    where
        F: Fn(&mut Order) -> Result<(), StoreError>,
    {
        unwrap_tx(self.tree().transaction(|tx| {
            let bytes = match tx.get(keys::order(id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("order", id)),
            };
            let mut order: Order = tx_decode(&bytes)?;
            if let Err(err) = mutate(&mut order) {
                return Err(ConflictableTransactionError::Abort(err));
            }
            order.updated_at = Utc::now();
            tx.insert(keys::order(id), tx_encode(&order)?)?;
            Ok(order)
        }))
    }

    pub fn set_order_payload(&self, id: i64, payload_id: i64) -> Result<Order, StoreError> {
        self.update_order(id, |order| {
            order.payload_id = Some(payload_id);
            Ok(())
        })
    }

    pub fn set_order_robot(&self, id: i64, robot_id: &str) -> Result<Order, StoreError> {
        self.update_order(id, |order| {
            order.robot_id = Some(robot_id.to_string());
            Ok(())
        })
    }

    pub fn record_vendor_state(&self, id: i64, vendor_state: &str) -> Result<Order, StoreError> {
        self.update_order(id, |order| {
            order.vendor_state = Some(vendor_state.to_string());
            Ok(())
        })
    }

    pub fn set_order_pickup(&self, id: i64, pickup_node: &str) -> Result<Order, StoreError> {
        self.update_order(id, |order| {
            order.pickup_node = Some(pickup_node.to_string());
            Ok(())
        })
    }

    pub fn set_order_delivery(&self, id: i64, delivery_node: &str) -> Result<Order, StoreError> {
        self.update_order(id, |order| {
            order.delivery_node = Some(delivery_node.to_string());
            Ok(())
        })
    }
}
