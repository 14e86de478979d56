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

//! Durable store for the Shingo dispatch core.
//!
//! The store is the single source of truth for orders, payloads, the outbox
//! and the reference entities the dispatcher resolves against. It is backed by
//! a single sled tree with namespaced keys, so every compound write — an order
//! transition together with its history row and its outbox reply — commits in
//! one transaction or not at all.
//!
//! Two invariants are enforced here rather than in callers:
//! * a payload carries at most one live claim (`claim_payload` is a
//!   conditional update, a lost race surfaces as [`StoreError::ClaimConflict`]);
//! * an order that has reached a terminal status never transitions again.

/// Append-only audit log.
pub mod audit;

/// Write-through projection of per-node payload lists.
pub mod cache;

/// Edge-station registry.
pub mod edge;

/// All [`Error`](std::error::Error)s generated by the store.
pub mod error;

/// Order, history and transactional order/outbox writes.
pub mod order;

/// Outbox rows and drain bookkeeping.
pub mod outbox;

/// Payloads, payload types and the claim invariant.
pub mod payload;

/// Facility nodes (reference entities).
pub mod node;

/// Per-station production tallies.
pub mod tally;

mod keys;
mod store;

pub use cache::NodeStateCache;
pub use error::StoreError;
pub use store::Store;
