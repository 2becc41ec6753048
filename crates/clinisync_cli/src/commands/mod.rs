//! CLI command implementations.

pub mod compact;
pub mod conflicts;
pub mod inspect;
pub mod pending;
pub mod verify;

use clinisync_engine::{Stores, SyncStorage};
use std::path::Path;

/// Opens and replays the store at `path`.
///
/// Refuses to create a store where none exists.
pub fn open_store(path: &Path) -> Result<Stores, Box<dyn std::error::Error>> {
    if !SyncStorage::exists(path) {
        return Err(format!("No sync store found at {}", path.display()).into());
    }
    Ok(SyncStorage::open_dir(path)?.load()?)
}
