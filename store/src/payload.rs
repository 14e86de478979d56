//! Payloads (totes, bins, carts), payload types and the claim invariant.

use crate::{
    error::StoreError,
    keys,
    store::{abort, tx_decode, tx_encode, unwrap_tx, Store},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a physical payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    #[display("available")]
    Available,
    #[display("in_transit")]
    InTransit,
    #[display("at_line")]
    AtLine,
    #[display("empty")]
    Empty,
    #[display("hold")]
    Hold,
}

/// Reference entity describing a class of payload content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadType {
    pub id: i64,
    pub code: String,
    pub description: String,
}

/// Persisted payload record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub id: i64,
    pub payload_type_id: i64,
    pub node: Option<String>,
    pub status: PayloadStatus,
    pub claimed_by: Option<i64>,
    /// When the payload last arrived at its current node. Drives FIFO
    /// source selection.
    pub delivered_at: Option<DateTime<Utc>>,
    pub notes: String,
}

/// Attributes of a new payload row.
#[derive(Debug, Clone)]
pub struct NewPayload {
    pub payload_type_id: i64,
    pub node: Option<String>,
    pub status: PayloadStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub notes: String,
}

impl Store {
    /// Create the payload type if missing, otherwise return the stored row.
    pub fn upsert_payload_type(
        &self,
        code: &str,
        description: &str,
    ) -> Result<PayloadType, StoreError> {
        if let Some(existing) = self.payload_type_by_code(code)? {
            return Ok(existing);
        }
        let payload_type = PayloadType {
            id: self.next_id()?,
            code: code.to_string(),
            description: description.to_string(),
        };
        self.put(&keys::payload_type(code), &payload_type)?;
        Ok(payload_type)
    }

    pub fn payload_type_by_code(&self, code: &str) -> Result<Option<PayloadType>, StoreError> {
        self.get(&keys::payload_type(code))
    }

    pub fn insert_payload(&self, new: NewPayload) -> Result<Payload, StoreError> {
        let payload = Payload {
            id: self.next_id()?,
            payload_type_id: new.payload_type_id,
            node: new.node,
            status: new.status,
            claimed_by: None,
            delivered_at: new.delivered_at,
            notes: new.notes,
        };
        self.put(&keys::payload(payload.id), &payload)?;
        Ok(payload)
    }

    pub fn payload(&self, id: i64) -> Result<Option<Payload>, StoreError> {
        self.get(&keys::payload(id))
    }

    pub fn payloads(&self) -> Result<Vec<Payload>, StoreError> {
        self.scan(keys::PAYLOAD)
    }

    pub fn payloads_at_node(&self, node: &str) -> Result<Vec<Payload>, StoreError> {
        Ok(self
            .payloads()?
            .into_iter()
            .filter(|payload| payload.node.as_deref() == Some(node))
            .collect())
    }

    pub fn payloads_claimed_by(&self, order_id: i64) -> Result<Vec<Payload>, StoreError> {
        Ok(self
            .payloads()?
            .into_iter()
            .filter(|payload| payload.claimed_by == Some(order_id))
            .collect())
    }

    /// Claim a payload for an order.
    ///
    /// Conditional update: the claim succeeds only while `claimed_by` is
    /// empty (or already this order). A lost race is a [`StoreError::ClaimConflict`],
    /// never a double claim.
    pub fn claim_payload(&self, payload_id: i64, order_id: i64) -> Result<Payload, StoreError> {
        unwrap_tx(self.tree().transaction(|tx| {
            let bytes = match tx.get(keys::payload(payload_id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("payload", payload_id)),
            };
            let mut payload: Payload = tx_decode(&bytes)?;
            match payload.claimed_by {
                None => payload.claimed_by = Some(order_id),
                Some(existing) if existing == order_id => {}
                Some(existing) => {
                    return abort(StoreError::ClaimConflict {
                        payload: payload_id,
                        claimed_by: existing,
                    })
                }
            }
            tx.insert(keys::payload(payload_id), tx_encode(&payload)?)?;
            Ok(payload)
        }))
    }

    /// Release every claim held by an order. Returns the released payloads.
    pub fn unclaim_for_order(&self, order_id: i64) -> Result<Vec<Payload>, StoreError> {
        let mut released = Vec::new();
        for payload in self.payloads_claimed_by(order_id)? {
            released.push(self.unclaim_payload(payload.id, order_id)?);
        }
        Ok(released)
    }

    fn unclaim_payload(&self, payload_id: i64, order_id: i64) -> Result<Payload, StoreError> {
        unwrap_tx(self.tree().transaction(|tx| {
            let bytes = match tx.get(keys::payload(payload_id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("payload", payload_id)),
            };
            let mut payload: Payload = tx_decode(&bytes)?;
            if payload.claimed_by == Some(order_id) {
                payload.claimed_by = None;
            }
            tx.insert(keys::payload(payload_id), tx_encode(&payload)?)?;
            Ok(payload)
        }))
    }

    /// Move a payload to a node. Stamps `delivered_at`, applies the new
    /// status and implicitly clears any claim.
    pub fn move_payload(
        &self,
        payload_id: i64,
        node: &str,
        status: PayloadStatus,
    ) -> Result<Payload, StoreError> {
        unwrap_tx(self.tree().transaction(|tx| {
            let bytes = match tx.get(keys::payload(payload_id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("payload", payload_id)),
            };
            let mut payload: Payload = tx_decode(&bytes)?;
            payload.node = Some(node.to_string());
            payload.status = status;
            payload.claimed_by = None;
            payload.delivered_at = Some(Utc::now());
            tx.insert(keys::payload(payload_id), tx_encode(&payload)?)?;
            Ok(payload)
        }))
    }

    pub fn update_payload_status(
        &self,
        payload_id: i64,
        status: PayloadStatus,
    ) -> Result<Payload, StoreError> {
        unwrap_tx(self.tree().transaction(|tx| {
            let bytes = match tx.get(keys::payload(payload_id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("payload", payload_id)),
            };
            let mut payload: Payload = tx_decode(&bytes)?;
            payload.status = status;
            tx.insert(keys::payload(payload_id), tx_encode(&payload)?)?;
            Ok(payload)
        }))
    }
}
