//! Tracing initialisers for the dispatch core.
//!
//! Level defaults to INFO and is adjustable per module through `RUST_LOG`
//! (eg/ `RUST_LOG=shingo_core=debug,shingo_store=warn`).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise standard (human-readable) logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init()
}

/// Initialise JSON logging for aggregators.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init()
}
