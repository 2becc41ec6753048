//! Compact command implementation.

use super::open_store;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut stores = open_store(path)?;
    let before = stores.journal_stats()?;

    println!("Compacting sync store at {}", path.display());
    println!();
    for stats in &before {
        println!(
            "  {:<10} {:>8} bytes  {:>6} records  {:>6} dead",
            stats.name,
            stats.bytes,
            stats.records,
            stats.dead()
        );
    }

    let dead: u64 = before.iter().map(|s| s.dead()).sum();
    if dry_run {
        println!();
        println!("Dry run: {dead} superseded records would be dropped");
        return Ok(());
    }

    stores.compact()?;
    let after = stores.journal_stats()?;
    let reclaimed: u64 = before
        .iter()
        .zip(after.iter())
        .map(|(b, a)| b.bytes.saturating_sub(a.bytes))
        .sum();
    tracing::info!(dropped = dead, reclaimed, "store compacted");

    println!();
    println!("✓ Dropped {dead} records, reclaimed {reclaimed} bytes");
    Ok(())
}
