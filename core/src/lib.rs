#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Order lifecycle engine of the Shingo dispatch service.
//!
//! Inbound bytes from the facility bus flow through the [`Ingestor`](ingest::Ingestor)
//! (header gate, expiry, filter), are dispatched by type and subject to the
//! [`Dispatcher`](dispatch::Dispatcher) (the order state machine), which
//! resolves payloads against the store, places transport orders with the
//! fleet and enqueues every outbound reply in the durable outbox. The
//! [`OrderTracker`](tracker::OrderTracker) polls the vendor for progress and
//! synthesises [`OrderStatusChanged`](event::OrderStatusChanged) events, the
//! [`OutboxDrainer`](outbox_drain::OutboxDrainer) pushes pending replies to
//! the bus with retry, and the [`Engine`](engine::Engine) wires the pieces
//! together and owns their lifecycle.
//!
//! Concurrency model: the ingestor is synchronous on the bus-consumer task,
//! the tracker / drainer / health probe run as independent periodic tasks,
//! and the in-process [`EventBus`](bus::EventBus) delivers synchronously on
//! the emitting task. Nothing suspends while holding a lock.

/// In-process multicast of typed [`Event`](event::Event)s.
pub mod bus;

/// Engine configuration.
pub mod config;

/// Order state machine: request, cancel, receipt, redirect, storage waybill.
pub mod dispatch;

/// Engine wiring and lifecycle.
pub mod engine;

/// All [`Error`](std::error::Error)s generated in the core.
pub mod error;

/// Typed events flowing over the in-process bus.
pub mod event;

/// Inbound byte pipeline: header gate, decode, dispatch by type and subject.
pub mod ingest;

/// Tracing initialisers.
pub mod logging;

/// Periodic publisher of pending outbox rows.
pub mod outbox_drain;

/// Poller tracking active vendor orders.
pub mod tracker;

pub use engine::Engine;
pub use error::EngineError;
