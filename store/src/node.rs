//! Facility nodes: named locations payloads move between.

use crate::{error::StoreError, keys, store::Store};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// What a node is used for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[display("storage")]
    Storage,
    #[display("line_side")]
    LineSide,
    #[display("staging")]
    Staging,
    #[display("charging")]
    Charging,
}

/// Reference entity for a named facility location. The name is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Location string the fleet vendor understands for this node.
    pub vendor_location: String,
    pub node_type: NodeType,
    pub zone: String,
    pub capacity: u32,
    pub enabled: bool,
}

impl Store {
    pub fn upsert_node(&self, node: &Node) -> Result<(), StoreError> {
        self.put(&keys::node(&node.name), node)
    }

    pub fn node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        self.get(&keys::node(name))
    }

    pub fn nodes(&self) -> Result<Vec<Node>, StoreError> {
        self.scan(keys::NODE)
    }

    /// Enabled storage nodes, the candidate set for store-order destinations.
    pub fn storage_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .nodes()?
            .into_iter()
            .filter(|node| node.enabled && node.node_type == NodeType::Storage)
            .collect())
    }
}
