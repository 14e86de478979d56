//! Write-through projection of per-node payload lists.
//!
//! Reads prefer the cached entry and fall back to the store on miss; writes
//! hit the store first and then refresh the affected entries. The cache is
//! never authoritative for claim decisions — the store arbitrates those.

use crate::{
    error::StoreError,
    payload::{Payload, PayloadStatus},
    store::Store,
};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug)]
pub struct NodeStateCache {
    store: Store,
    entries: RwLock<HashMap<String, Vec<Payload>>>,
}

impl NodeStateCache {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Payloads currently at a node. Cache hit, or store fallback + fill.
    pub fn payloads_at(&self, node: &str) -> Result<Vec<Payload>, StoreError> {
        if let Some(cached) = self.entries.read().get(node) {
            return Ok(cached.clone());
        }
        self.refresh(node)
    }

    /// Reload one node's entry from the store.
    pub fn refresh(&self, node: &str) -> Result<Vec<Payload>, StoreError> {
        let payloads = self.store.payloads_at_node(node)?;
        self.entries
            .write()
            .insert(node.to_string(), payloads.clone());
        Ok(payloads)
    }

    pub fn invalidate(&self, node: &str) {
        self.entries.write().remove(node);
    }

    /// Move a payload between nodes: store first, then refresh the entries
    /// of both the origin and the destination.
    pub fn move_payload(
        &self,
        payload_id: i64,
        to_node: &str,
        status: PayloadStatus,
    ) -> Result<Payload, StoreError> {
        let origin = self
            .store
            .payload(payload_id)?
            .and_then(|payload| payload.node);

        let moved = self.store.move_payload(payload_id, to_node, status)?;

        if let Some(origin) = origin {
            if origin != to_node {
                self.refresh(&origin)?;
            }
        }
        self.refresh(to_node)?;
        Ok(moved)
    }

    pub fn occupancy(&self, node: &str) -> Result<usize, StoreError> {
        Ok(self.payloads_at(node)?.len())
    }
}
