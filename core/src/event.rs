//! Typed events flowing over the in-process [`EventBus`](crate::bus::EventBus).

use chrono::{DateTime, Utc};
use derive_more::{Constructor, From};
use shingo_store::order::OrderType;
use shingo_wire::message::ErrorCode;
use uuid::Uuid;

/// Event envelope: a kind plus the emission timestamp.
///
/// The timestamp is stamped by [`EventBus::emit`](crate::bus::EventBus::emit)
/// when absent, so construction sites never have to care.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

impl From<EventKind> for Event {
    fn from(kind: EventKind) -> Self {
        Self {
            timestamp: None,
            kind,
        }
    }
}

/// Discriminant used for filtered subscriptions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EventType {
    OrderReceived,
    OrderDispatched,
    OrderStatusChanged,
    OrderCompleted,
    OrderFailed,
    OrderCancelled,
    PayloadChanged,
    NodeUpdated,
    CorrectionApplied,
    FleetConnected,
    FleetDisconnected,
    MessagingConnected,
    MessagingDisconnected,
}

/// Every event kind the core emits.
#[derive(Debug, Clone, PartialEq, From)]
pub enum EventKind {
    OrderReceived(OrderReceived),
    OrderDispatched(OrderDispatched),
    OrderStatusChanged(OrderStatusChanged),
    OrderCompleted(OrderCompleted),
    OrderFailed(OrderFailed),
    OrderCancelled(OrderCancelled),
    PayloadChanged(PayloadChanged),
    NodeUpdated(NodeUpdated),
    CorrectionApplied(CorrectionApplied),
    FleetConnected(FleetConnected),
    FleetDisconnected(FleetDisconnected),
    MessagingConnected(MessagingConnected),
    MessagingDisconnected(MessagingDisconnected),
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::OrderReceived(_) => EventType::OrderReceived,
            Self::OrderDispatched(_) => EventType::OrderDispatched,
            Self::OrderStatusChanged(_) => EventType::OrderStatusChanged,
            Self::OrderCompleted(_) => EventType::OrderCompleted,
            Self::OrderFailed(_) => EventType::OrderFailed,
            Self::OrderCancelled(_) => EventType::OrderCancelled,
            Self::PayloadChanged(_) => EventType::PayloadChanged,
            Self::NodeUpdated(_) => EventType::NodeUpdated,
            Self::CorrectionApplied(_) => EventType::CorrectionApplied,
            Self::FleetConnected(_) => EventType::FleetConnected,
            Self::FleetDisconnected(_) => EventType::FleetDisconnected,
            Self::MessagingConnected(_) => EventType::MessagingConnected,
            Self::MessagingDisconnected(_) => EventType::MessagingDisconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct OrderReceived {
    pub order_id: i64,
    pub uuid: Uuid,
    pub station: String,
    pub order_type: OrderType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderDispatched {
    pub order_id: i64,
    pub uuid: Uuid,
    pub station: String,
    pub vendor_order_id: String,
    /// Vendor state at placement, seeds the tracker's last-seen entry.
    pub vendor_state: String,
    /// Previous binding when a redirect re-placed the order.
    pub previous_vendor_order_id: Option<String>,
}

/// Vendor-side state transition observed by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusChanged {
    pub order_id: i64,
    pub vendor_order_id: String,
    pub old_state: String,
    pub new_state: String,
    pub robot_id: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct OrderCompleted {
    pub order_id: i64,
    pub uuid: Uuid,
    pub station: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderFailed {
    pub order_id: i64,
    pub uuid: Uuid,
    pub station: String,
    pub code: ErrorCode,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderCancelled {
    pub order_id: i64,
    pub uuid: Uuid,
    pub station: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadChanged {
    pub payload_id: i64,
    pub action: String,
    pub node: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct NodeUpdated {
    pub node: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct CorrectionApplied {
    pub entity_type: String,
    pub entity_id: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct FleetConnected {
    pub vendor: String,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct FleetDisconnected {
    pub vendor: String,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct MessagingConnected {
    pub broker: String,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct MessagingDisconnected {
    pub broker: String,
}
