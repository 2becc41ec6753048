//! # Clinisync Protocol
//!
//! Data model and wire types shared by the sync engine, its stores and any
//! transport talking to the remote authority.
//!
//! This crate provides:
//! - [`SyncEntity`], [`SyncConflict`] and [`SyncMeta`] with their CBOR record encodings
//! - The integrity checksum ([`checksum`]) and store digest ([`digest`])
//! - [`PushRequest`] / [`PushResponse`] exchanged with the remote authority
//! - Default priorities per entity type ([`default_priority`])
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod fields;
mod integrity;
mod messages;
mod meta;
mod priority;
mod time;

pub use conflict::{ConflictType, ResolutionStrategy, SyncConflict};
pub use entity::{EntityKey, SyncEntity, SyncStatus};
pub use error::{ProtocolError, ProtocolResult};
pub use integrity::{checksum, digest};
pub use messages::{PushRequest, PushResponse};
pub use meta::SyncMeta;
pub use priority::{default_priority, Priority, HIGHEST_PRIORITY};
pub use time::Timestamp;
