//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration of the dispatch engine.
///
/// Every field has a production-reasonable default so a bare config file is
/// enough to bring a core up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Station name of the core itself, used as the source address of every
    /// outbound envelope.
    pub station: String,

    /// Topic edge stations publish order traffic on.
    pub orders_topic: String,

    /// Topic the core publishes dispatch traffic on.
    pub dispatch_topic: String,

    /// Path of the durable store.
    pub store_path: String,

    /// Seconds between tracker polls of the fleet.
    pub tracker_interval_secs: u64,

    /// Seconds between outbox drains.
    pub drain_interval_secs: u64,

    /// Maximum outbox rows published per drain.
    pub drain_batch: usize,

    /// Seconds between fleet/bus health probes.
    pub probe_interval_secs: u64,

    /// Timeout applied to a health probe ping.
    pub probe_timeout_secs: u64,

    /// Timeout applied to fleet calls (placement, cancel, poll).
    pub fleet_timeout_secs: u64,

    /// Timeout handed to the broker client for connection establishment.
    pub bus_connect_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            station: "dispatch".to_string(),
            orders_topic: shingo_wire::TOPIC_ORDERS.to_string(),
            dispatch_topic: shingo_wire::TOPIC_DISPATCH.to_string(),
            store_path: "data/shingo".to_string(),
            tracker_interval_secs: 5,
            drain_interval_secs: 5,
            drain_batch: 50,
            probe_interval_secs: 30,
            probe_timeout_secs: 3,
            fleet_timeout_secs: 10,
            bus_connect_timeout_secs: 5,
        }
    }
}

impl EngineConfig {
    pub fn tracker_interval(&self) -> Duration {
        Duration::from_secs(self.tracker_interval_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn fleet_timeout(&self) -> Duration {
        Duration::from_secs(self.fleet_timeout_secs)
    }

    pub fn bus_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.bus_connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"station": "dispatch-b", "drain_batch": 10}"#).unwrap();
        assert_eq!(config.station, "dispatch-b");
        assert_eq!(config.drain_batch, 10);
        assert_eq!(config.orders_topic, "shingo.orders");
        assert_eq!(config.tracker_interval_secs, 5);
    }
}
