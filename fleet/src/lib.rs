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

//! Vendor-neutral contract with the mobile-robot fleet.
//!
//! The dispatch core only ever talks to the vendor through [`FleetAdapter`]:
//! * Swapping vendors (or the [`StubFleet`](stub::StubFleet)) never touches
//!   dispatch logic
//! * The contract is deliberately narrow: place, cancel, re-prioritise, ping
//!   and poll — the vendor's own scheduling stays on its side
//! * Placement idempotency is not promised; the dispatcher never retries a
//!   placement
//!
//! Concrete vendor HTTP clients live outside the core behind this trait.

use derive_more::Constructor;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use shingo_store::order::OrderStatus;
use thiserror::Error;
use uuid::Uuid;

/// In-memory stub vendor for tests and bring-up.
pub mod stub;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unknown vendor order: {0}")]
    UnknownOrder(String),
}

/// Transport order submitted to the vendor.
///
/// `vendor_order_id` is chosen by the dispatcher (it embeds the internal
/// order id); `external_id` is the caller's UUID, passed through so vendor
/// dashboards show the requester's reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Constructor)]
pub struct TransportOrderRequest {
    pub vendor_order_id: String,
    pub order_id: i64,
    pub external_id: Uuid,
    pub from_location: String,
    pub to_location: String,
    pub priority: i32,
}

/// Outcome of a successful placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOrderResult {
    /// Authoritative id of the placed order. Usually echoes the request's,
    /// but the vendor has the last word.
    pub vendor_order_id: String,
    pub state: String,
}

/// Point-in-time view of a placed order, as reported by the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOrderDetail {
    pub vendor_order_id: String,
    pub state: String,
    /// Empty while no robot is assigned.
    pub robot_id: String,
    pub detail: String,
}

/// Narrow, object-safe contract the core depends on.
pub trait FleetAdapter: Send + Sync + 'static {
    /// Human-readable vendor identity.
    fn name(&self) -> &'static str;

    /// Place a transport order. Not idempotent; callers must not retry.
    fn create_transport_order<'a>(
        &'a self,
        request: &'a TransportOrderRequest,
    ) -> BoxFuture<'a, Result<TransportOrderResult, FleetError>>;

    /// Best-effort cancellation. Callers log failures and move on.
    fn cancel_order<'a>(&'a self, vendor_order_id: &'a str)
        -> BoxFuture<'a, Result<(), FleetError>>;

    fn set_order_priority<'a>(
        &'a self,
        vendor_order_id: &'a str,
        priority: i32,
    ) -> BoxFuture<'a, Result<(), FleetError>>;

    /// Liveness probe.
    fn ping(&self) -> BoxFuture<'_, Result<(), FleetError>>;

    /// Translate a vendor status token into a canonical order status.
    fn map_state(&self, vendor_state: &str) -> OrderStatus;

    fn is_terminal_state(&self, vendor_state: &str) -> bool;

    /// Poll one placed order. Used by the tracker.
    fn get_order_detail<'a>(
        &'a self,
        vendor_order_id: &'a str,
    ) -> BoxFuture<'a, Result<TransportOrderDetail, FleetError>>;
}

/// Vendor status tokens of the stub fleet. Real vendors bring their own
/// vocabulary behind `map_state`.
pub mod state {
    pub const CREATED: &str = "CREATED";
    pub const ASSIGNED: &str = "ASSIGNED";
    pub const MOVING: &str = "MOVING";
    pub const FINISHED: &str = "FINISHED";
    pub const FAILED: &str = "FAILED";
    pub const CANCELLED: &str = "CANCELLED";
}
