//! Registry of edge stations and their heartbeats.

use crate::{error::StoreError, keys, store::Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeStation {
    pub station_id: String,
    pub hostname: String,
    pub version: String,
    pub line_ids: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub active_orders: u32,
}

impl Store {
    /// Upsert a station on `edge.register`. Re-registration refreshes the
    /// metadata but keeps the original registration time.
    pub fn register_edge(
        &self,
        station_id: &str,
        hostname: &str,
        version: &str,
        line_ids: &[String],
    ) -> Result<EdgeStation, StoreError> {
        let now = Utc::now();
        let registered_at = self
            .edge(station_id)?
            .map(|existing| existing.registered_at)
            .unwrap_or(now);

        let station = EdgeStation {
            station_id: station_id.to_string(),
            hostname: hostname.to_string(),
            version: version.to_string(),
            line_ids: line_ids.to_vec(),
            registered_at,
            last_heartbeat: now,
            active_orders: 0,
        };
        self.put(&keys::edge(station_id), &station)?;
        Ok(station)
    }

    /// Refresh a station's heartbeat. Unknown stations are created so a core
    /// restart does not drop heartbeats arriving before re-registration.
    pub fn record_heartbeat(
        &self,
        station_id: &str,
        active_orders: u32,
    ) -> Result<EdgeStation, StoreError> {
        let now = Utc::now();
        let mut station = self.edge(station_id)?.unwrap_or(EdgeStation {
            station_id: station_id.to_string(),
            hostname: String::new(),
            version: String::new(),
            line_ids: Vec::new(),
            registered_at: now,
            last_heartbeat: now,
            active_orders: 0,
        });
        station.last_heartbeat = now;
        station.active_orders = active_orders;
        self.put(&keys::edge(station_id), &station)?;
        Ok(station)
    }

    pub fn edge(&self, station_id: &str) -> Result<Option<EdgeStation>, StoreError> {
        self.get(&keys::edge(station_id))
    }

    pub fn edges(&self) -> Result<Vec<EdgeStation>, StoreError> {
        self.scan(keys::EDGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reregistration_keeps_first_seen_time() {
        let store = Store::temporary().unwrap();
        let first = store
            .register_edge("line-01", "edge-a", "1.0", &["L1".to_string()])
            .unwrap();
        let second = store
            .register_edge("line-01", "edge-b", "1.1", &["L1".to_string(), "L2".to_string()])
            .unwrap();

        assert_eq!(second.registered_at, first.registered_at);
        assert_eq!(second.hostname, "edge-b");
        assert_eq!(second.line_ids.len(), 2);
    }

    #[test]
    fn heartbeat_creates_unknown_station() {
        let store = Store::temporary().unwrap();
        let station = store.record_heartbeat("line-02", 3).unwrap();
        assert_eq!(station.active_orders, 3);
        assert!(store.edge("line-02").unwrap().is_some());
    }
}
