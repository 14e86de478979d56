//! Durable buffer of outbound envelopes awaiting bus publication.
//!
//! A row with `sent_at = None` will be resent; `sent_at` is only set once the
//! bus accepted the publish. Rows are keyed by ascending id so a prefix scan
//! yields them in enqueue order.

use crate::{
    error::StoreError,
    keys,
    store::{abort, tx_decode, tx_encode, unwrap_tx, Store},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};

/// Persisted outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub event_type: String,
    pub station: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Attributes of a message to enqueue.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub event_type: String,
    pub station: String,
}

/// Build and insert the row inside an open transaction, so callers can commit
/// it together with the state change that produced it.
pub(crate) fn tx_enqueue(
    tx: &TransactionalTree,
    id: i64,
    new: &NewOutboxMessage,
    now: DateTime<Utc>,
) -> Result<OutboxMessage, ConflictableTransactionError<StoreError>> {
    let message = OutboxMessage {
        id,
        topic: new.topic.clone(),
        payload: new.payload.clone(),
        event_type: new.event_type.clone(),
        station: new.station.clone(),
        retry_count: 0,
        created_at: now,
        sent_at: None,
    };
    tx.insert(keys::outbox(id), tx_encode(&message)?)?;
    Ok(message)
}

impl Store {
    /// Enqueue a standalone message (one not tied to an order transition).
    pub fn enqueue_outbox(&self, new: NewOutboxMessage) -> Result<OutboxMessage, StoreError> {
        let id = self.next_id()?;
        unwrap_tx(
            self.tree()
                .transaction(|tx| tx_enqueue(tx, id, &new, Utc::now())),
        )
    }

    /// Up to `limit` unsent rows in enqueue order.
    pub fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows: Vec<OutboxMessage> = self.scan(keys::OUTBOX)?;
        Ok(rows
            .into_iter()
            .filter(|row| row.sent_at.is_none())
            .take(limit)
            .collect())
    }

    /// Record that the bus accepted the publish.
    pub fn mark_outbox_sent(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        unwrap_tx(self.tree().transaction(|tx| {
            let bytes = match tx.get(keys::outbox(id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("outbox", id)),
            };
            let mut message: OutboxMessage = tx_decode(&bytes)?;
            message.sent_at = Some(at);
            tx.insert(keys::outbox(id), tx_encode(&message)?)?;
            Ok(())
        }))
    }

    /// Record a failed publish attempt. The row stays pending.
    pub fn record_outbox_failure(&self, id: i64) -> Result<u32, StoreError> {
        unwrap_tx(self.tree().transaction(|tx| {
            let bytes = match tx.get(keys::outbox(id))? {
                Some(bytes) => bytes,
                None => return abort(StoreError::not_found("outbox", id)),
            };
            let mut message: OutboxMessage = tx_decode(&bytes)?;
            message.retry_count += 1;
            tx.insert(keys::outbox(id), tx_encode(&message)?)?;
            Ok(message.retry_count)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(topic: &str, event_type: &str) -> NewOutboxMessage {
        NewOutboxMessage {
            topic: topic.to_string(),
            payload: br#"{"order_uuid":"u"}"#.to_vec(),
            event_type: event_type.to_string(),
            station: "line-01".to_string(),
        }
    }

    #[test]
    fn pending_preserves_enqueue_order() {
        let store = Store::temporary().unwrap();
        let first = store.enqueue_outbox(reply("shingo.dispatch", "order.ack")).unwrap();
        let second = store.enqueue_outbox(reply("shingo.dispatch", "order.update")).unwrap();
        let third = store.enqueue_outbox(reply("shingo.dispatch", "order.delivered")).unwrap();

        let pending = store.pending_outbox(10).unwrap();
        let ids: Vec<i64> = pending.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);

        let limited = store.pending_outbox(2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, first.id);
    }

    #[test]
    fn sent_rows_leave_the_pending_set() {
        let store = Store::temporary().unwrap();
        let first = store.enqueue_outbox(reply("shingo.dispatch", "order.ack")).unwrap();
        let second = store.enqueue_outbox(reply("shingo.dispatch", "order.update")).unwrap();

        store.mark_outbox_sent(first.id, Utc::now()).unwrap();

        let pending = store.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[test]
    fn failures_increment_retries_and_stay_pending() {
        let store = Store::temporary().unwrap();
        let row = store.enqueue_outbox(reply("shingo.dispatch", "order.error")).unwrap();

        assert_eq!(store.record_outbox_failure(row.id).unwrap(), 1);
        assert_eq!(store.record_outbox_failure(row.id).unwrap(), 2);

        let pending = store.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 2);
        assert_eq!(pending[0].sent_at, None);
    }
}
