//! Key layout of the single backing tree.
//!
//! Numeric ids are big-endian so `scan_prefix` yields rows in allocation
//! order, which is what the outbox drain and FIFO queries rely on.

use uuid::Uuid;

pub const ORDER: &str = "order/";
pub const ORDER_UUID: &str = "order_uuid/";
pub const ORDER_VENDOR: &str = "order_vendor/";
pub const HISTORY: &str = "history/";
pub const PAYLOAD: &str = "payload/";
pub const PAYLOAD_TYPE: &str = "ptype/";
pub const NODE: &str = "node/";
pub const OUTBOX: &str = "outbox/";
pub const AUDIT: &str = "audit/";
pub const EDGE: &str = "edge/";
pub const TALLY: &str = "tally/";

fn compose(prefix: &str, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix.as_bytes());
    key.extend_from_slice(suffix);
    key
}

pub fn order(id: i64) -> Vec<u8> {
    compose(ORDER, &id.to_be_bytes())
}

pub fn order_uuid(uuid: &Uuid) -> Vec<u8> {
    compose(ORDER_UUID, uuid.as_bytes())
}

pub fn order_vendor(vendor_order_id: &str) -> Vec<u8> {
    compose(ORDER_VENDOR, vendor_order_id.as_bytes())
}

pub fn history(order_id: i64, seq: u64) -> Vec<u8> {
    let mut key = compose(HISTORY, &order_id.to_be_bytes());
    key.push(b'/');
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub fn history_prefix(order_id: i64) -> Vec<u8> {
    let mut key = compose(HISTORY, &order_id.to_be_bytes());
    key.push(b'/');
    key
}

pub fn payload(id: i64) -> Vec<u8> {
    compose(PAYLOAD, &id.to_be_bytes())
}

pub fn payload_type(code: &str) -> Vec<u8> {
    compose(PAYLOAD_TYPE, code.as_bytes())
}

pub fn node(name: &str) -> Vec<u8> {
    compose(NODE, name.as_bytes())
}

pub fn outbox(id: i64) -> Vec<u8> {
    compose(OUTBOX, &id.to_be_bytes())
}

pub fn audit(id: i64) -> Vec<u8> {
    compose(AUDIT, &id.to_be_bytes())
}

pub fn edge(station_id: &str) -> Vec<u8> {
    compose(EDGE, station_id.as_bytes())
}

pub fn tally(station_id: &str, cat_id: &str) -> Vec<u8> {
    let mut key = compose(TALLY, station_id.as_bytes());
    key.push(0);
    key.extend_from_slice(cat_id.as_bytes());
    key
}
