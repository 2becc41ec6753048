//! # Clinisync Engine
//!
//! Offline-first synchronization engine for clinic data.
//!
//! Applications enqueue entity changes locally; the engine persists them in
//! crash-safe journals and pushes them to a remote authority in priority
//! order whenever connectivity allows.
//!
//! This crate provides:
//! - Durable entity, conflict and metadata stores ([`SyncStorage`])
//! - A batch processor with bounded per-request timeouts
//! - Exponential-backoff retries ([`RetryScheduler`])
//! - Conflict capture and resolution
//! - An event bus for progress and state changes ([`EventBus`])
//! - The [`SyncEngine`] facade tying them together
//!
//! ## Transport abstraction
//!
//! The engine is transport-agnostic: it pushes through any
//! [`SyncTransport`]. [`MemoryRemote`] is an in-process remote authority for
//! tests and demos.
//!
//! ## Concurrency
//!
//! At most one sync cycle runs at a time. Requests inside a batch run
//! concurrently; batches run one after another.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod control;
mod engine;
mod error;
mod events;
mod filter;
mod journal;
mod processor;
mod remote;
mod retry;
mod status;
mod store;
mod transport;

pub use config::{RetryConfig, Tier, TierConfig};
pub use connectivity::ConnectivityMonitor;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, EventHandler, EventKind, Subscription, SyncEvent};
pub use filter::SyncFilter;
pub use journal::{Journal, JournalRecord, RecordKind, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use remote::{MemoryRemote, RemoteRecord, ScriptedFailure};
pub use retry::{RetryDecision, RetryFire, RetryScheduler};
pub use status::{CycleOutcome, SyncStatusReport};
pub use store::{
    ConflictStore, EntityStore, JournalStats, MetaStore, StatusCounts, StoreGuard, Stores,
    SyncStorage,
};
pub use transport::SyncTransport;

/// Crate version, reported by tooling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use clinisync_protocol::{
    default_priority, ConflictType, EntityKey, Priority, ResolutionStrategy, SyncConflict,
    SyncEntity, SyncStatus, Timestamp,
};
