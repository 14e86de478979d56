#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! Wire layer for the Shingo dispatch core.
//!
//! Everything that crosses the facility bus is an [`Envelope`](envelope::Envelope):
//! a JSON object with short field names carrying routing metadata and an opaque
//! payload. This crate owns the codec (including the cheap header-only decode
//! used to gate inbound traffic), the default time-to-live table, the typed
//! payload shapes exchanged with edge stations, and the [`MessageBus`](bus::MessageBus)
//! seam behind which the concrete broker client lives.

/// Envelope model, two-phase codec and addressing.
pub mod envelope;

/// All [`Error`](std::error::Error)s generated in the wire layer.
pub mod error;

/// Typed payload shapes for order messages and `data` subjects.
pub mod message;

/// Default time-to-live table keyed by envelope type and data subject.
pub mod ttl;

/// The [`MessageBus`](bus::MessageBus) seam and an in-memory implementation.
pub mod bus;

/// Wire protocol version stamped into every outbound envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Station name that addresses every station of a role.
pub const WILDCARD_STATION: &str = "*";

/// Default topic edge stations publish order traffic on.
pub const TOPIC_ORDERS: &str = "shingo.orders";

/// Default topic the core publishes dispatch traffic on.
pub const TOPIC_DISPATCH: &str = "shingo.dispatch";

/// Envelope type names used on the wire.
pub mod kind {
    pub const DATA: &str = "data";
    pub const ORDER_REQUEST: &str = "order.request";
    pub const ORDER_CANCEL: &str = "order.cancel";
    pub const ORDER_RECEIPT: &str = "order.receipt";
    pub const ORDER_REDIRECT: &str = "order.redirect";
    pub const ORDER_STORAGE_WAYBILL: &str = "order.storage_waybill";
    pub const ORDER_ACK: &str = "order.ack";
    pub const ORDER_WAYBILL: &str = "order.waybill";
    pub const ORDER_UPDATE: &str = "order.update";
    pub const ORDER_DELIVERED: &str = "order.delivered";
    pub const ORDER_ERROR: &str = "order.error";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
}

/// Subject names carried under the `data` envelope type.
pub mod subject {
    pub const EDGE_REGISTER: &str = "edge.register";
    pub const EDGE_REGISTERED: &str = "edge.registered";
    pub const EDGE_HEARTBEAT: &str = "edge.heartbeat";
    pub const EDGE_HEARTBEAT_ACK: &str = "edge.heartbeat_ack";
    pub const PRODUCTION_REPORT: &str = "production.report";
}
