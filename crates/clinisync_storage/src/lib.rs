//! # Clinisync Storage
//!
//! Byte-level storage for the sync engine's journals.
//!
//! Backends are **opaque append-only byte stores**: they never interpret
//! what they hold. Record framing, checksums and replay all live in the
//! engine's journal layer.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - for tests; clones share the same bytes, so a
//!   "restart" can be simulated by opening a second store over a clone
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use clinisync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"record").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
