//! Typed payload shapes for order messages and `data` subjects.
//!
//! Optional wire fields decode as their empty value (the dispatcher treats an
//! empty string as "not provided"), and additional fields are ignored so edge
//! stations can roll forward independently of the core.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical error codes carried in `order.error.error_code`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[display("payload_type_error")]
    PayloadTypeError,
    #[display("invalid_node")]
    InvalidNode,
    #[display("no_source")]
    NoSource,
    #[display("no_payload")]
    NoPayload,
    #[display("no_storage")]
    NoStorage,
    #[display("missing_pickup")]
    MissingPickup,
    #[display("claim_failed")]
    ClaimFailed,
    #[display("node_error")]
    NodeError,
    #[display("fleet_failed")]
    FleetFailed,
    #[display("redirect_failed")]
    RedirectFailed,
    #[display("unknown_type")]
    UnknownType,
    #[display("internal_error")]
    InternalError,
}

/// Two-level payload of a `data` envelope: the subject selects the schema of
/// the inner body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    pub subject: String,
    pub data: serde_json::Value,
}

/// `order.request` — an edge station asks for a payload movement.
///
/// `order_type` stays a string at the wire layer; the dispatcher resolves it
/// and answers `unknown_type` for anything it does not recognise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_uuid: Uuid,
    pub order_type: String,
    #[serde(default)]
    pub payload_type_code: String,
    #[serde(default)]
    pub payload_desc: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub delivery_node: String,
    #[serde(default)]
    pub pickup_node: String,
    #[serde(default)]
    pub staging_node: String,
    #[serde(default)]
    pub load_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub retrieve_empty: bool,
}

/// `order.cancel`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancel {
    pub order_uuid: Uuid,
    #[serde(default)]
    pub reason: String,
}

/// `order.receipt` — operator confirmation of a delivered order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_uuid: Uuid,
    #[serde(default)]
    pub receipt_type: String,
    #[serde(default)]
    pub final_count: i64,
}

/// `order.redirect` — change the delivery node of an in-flight order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRedirect {
    pub order_uuid: Uuid,
    pub new_delivery_node: String,
}

/// `order.storage_waybill` — line side announces a full payload to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStorageWaybill {
    pub order_uuid: Uuid,
    #[serde(default)]
    pub order_type: String,
    #[serde(default)]
    pub payload_desc: String,
    pub pickup_node: String,
    #[serde(default)]
    pub final_count: i64,
}

/// `order.ack` — sent exactly once per successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_uuid: Uuid,
    pub shingo_order_id: i64,
    #[serde(default)]
    pub source_node: String,
}

/// `order.waybill` — robot assignment details for an in-flight order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWaybill {
    pub order_uuid: Uuid,
    pub waybill_id: String,
    #[serde(default)]
    pub robot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
}

/// `order.update` — intermediate status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_uuid: Uuid,
    pub status: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,
}

/// `order.delivered`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_uuid: Uuid,
    pub delivered_at: DateTime<Utc>,
}

/// `order.error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderError {
    pub order_uuid: Uuid,
    pub error_code: ErrorCode,
    #[serde(default)]
    pub detail: String,
}

/// `order.cancelled`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_uuid: Uuid,
    #[serde(default)]
    pub reason: String,
}

/// `edge.register` data subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRegister {
    pub station_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub line_ids: Vec<String>,
}

/// `edge.registered` data subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRegistered {
    pub station_id: String,
    #[serde(default)]
    pub message: String,
}

/// `edge.heartbeat` data subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeHeartbeat {
    pub station_id: String,
    #[serde(default)]
    pub uptime_s: u64,
    #[serde(default)]
    pub active_orders: u32,
}

/// `edge.heartbeat_ack` data subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeHeartbeatAck {
    pub station_id: String,
    pub server_ts: DateTime<Utc>,
}

/// Single category tally inside a `production.report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionTally {
    pub cat_id: String,
    pub count: i64,
}

/// `production.report` data subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionReport {
    pub station_id: String,
    #[serde(default)]
    pub reports: Vec<ProductionTally>,
}
