//! pushkeep-core: web push subscription lifecycle
//!
//! Establishes, persists and renews a platform push subscription across
//! three contexts that share no memory: one or more foreground pages, a
//! single background worker, and a remote per-user document store.
//!
//! # Architecture
//!
//! ```text
//! Page ── permission, subscribe ──→ Persistence Gateway ──→ Document Store
//!   │                                        ↑
//!   └─ STORE_PUSH_METADATA ─→ Worker ── renewal (direct or HTTP relay)
//!                               │
//!   ←── PUSH_SUBSCRIPTION_CHANGE / NOTIFICATION_CLICKED ──┘
//! ```
//!
//! # Modules
//!
//! - `platform`: user-agent and display-mode detection
//! - `subscription`: record types and the fail-closed normalizer
//! - `identity`: endpoint → document key escaping
//! - `vapid`: application server key decoding
//! - `state`: per-subscription lifecycle state machine
//! - `store`: document store seam and in-memory store
//! - `gateway`: merge-upsert / delete of subscription records
//! - `relay`: HTTP relay client and receiver for renewal writes
//! - `worker_storage`: worker-local durable key-value storage
//! - `metadata`: single-slot renewal metadata cache
//! - `messages`, `clients`: cross-context messages and window clients
//! - `platform_api`: host collaborator traits
//! - `acquisition`: foreground enable / opt-out flow
//! - `renewal`: background renewal after invalidation
//! - `delivery`: inbound push rendering and click routing
//! - `notifier`: foreground handling of worker broadcasts
//! - `worker`: background worker event loop
//! - `sim`: in-process fakes of every host collaborator
//! - `config`, `logging`: TOML configuration and tracing setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod acquisition;
pub mod clients;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod logging;
pub mod messages;
pub mod metadata;
pub mod notifier;
pub mod platform;
pub mod platform_api;
pub mod relay;
pub mod renewal;
pub mod sim;
pub mod state;
pub mod store;
pub mod subscription;
pub mod vapid;
pub mod worker;
pub mod worker_storage;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
