//! Pending command implementation.

use super::open_store;
use clinisync_engine::SyncFilter;
use std::path::Path;

/// Runs the pending command.
pub fn run(
    path: &Path,
    types: Vec<String>,
    max_priority: Option<u32>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stores = open_store(path)?;

    let mut filter = SyncFilter::all();
    if !types.is_empty() {
        filter = filter.with_types(types);
    }
    if let Some(ceiling) = max_priority {
        filter = filter.with_max_priority(ceiling);
    }

    let queue = stores.entities.list_pending(&filter);
    let shown = limit.unwrap_or(queue.len()).min(queue.len());

    println!("{} pending entities", queue.len());
    if shown == 0 {
        return Ok(());
    }
    println!();
    println!(
        "{:>4}  {:<16} {:<24} {:>5}  {:>13}  CHECKSUM",
        "PRI", "TYPE", "ID", "RETRY", "MODIFIED"
    );
    for entity in queue.iter().take(shown) {
        println!(
            "{:>4}  {:<16} {:<24} {:>5}  {:>13}  {}",
            entity.priority,
            entity.entity_type(),
            entity.id(),
            entity.retry_count,
            entity.last_modified.as_millis(),
            short(entity.checksum()),
        );
    }
    if shown < queue.len() {
        println!("... {} more", queue.len() - shown);
    }

    Ok(())
}

fn short(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}
