//! Default time-to-live table for outbound envelopes.
//!
//! Request/ack traffic ages out quickly so stale commands are never acted on;
//! terminal notifications stay valid long enough to survive an edge-station
//! restart.

use crate::{kind, subject};
use chrono::TimeDelta;

/// Fallback for envelope types without a dedicated entry.
pub const DEFAULT_TTL_SECS: i64 = 600;

/// Fallback for `data` subjects without a dedicated entry.
pub const DATA_DEFAULT_TTL_SECS: i64 = 300;

/// Default time-to-live for an envelope type.
pub fn ttl_for(envelope_kind: &str) -> TimeDelta {
    let secs = match envelope_kind {
        kind::DATA => DATA_DEFAULT_TTL_SECS,
        kind::ORDER_REQUEST
        | kind::ORDER_CANCEL
        | kind::ORDER_REDIRECT
        | kind::ORDER_STORAGE_WAYBILL
        | kind::ORDER_ACK
        | kind::ORDER_UPDATE => 600,
        kind::ORDER_RECEIPT
        | kind::ORDER_WAYBILL
        | kind::ORDER_ERROR
        | kind::ORDER_CANCELLED => 1800,
        kind::ORDER_DELIVERED => 3600,
        _ => DEFAULT_TTL_SECS,
    };
    TimeDelta::seconds(secs)
}

/// Default time-to-live for a `data` subject.
pub fn data_ttl_for(data_subject: &str) -> TimeDelta {
    let secs = match data_subject {
        subject::EDGE_HEARTBEAT | subject::EDGE_HEARTBEAT_ACK => 90,
        subject::EDGE_REGISTER | subject::EDGE_REGISTERED => 300,
        subject::PRODUCTION_REPORT => 300,
        _ => DATA_DEFAULT_TTL_SECS,
    };
    TimeDelta::seconds(secs)
}
