use shingo_fleet::FleetError;
use shingo_store::StoreError;
use shingo_wire::{bus::BusError, error::WireError};
use thiserror::Error;

/// Central error type for the core engine, aggregating the subsystem errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("wire: {0}")]
    Wire(#[from] WireError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("fleet: {0}")]
    Fleet(#[from] FleetError),

    #[error("bus: {0}")]
    Bus(#[from] BusError),

    #[error("message codec: {0}")]
    Codec(#[from] serde_json::Error),
}
