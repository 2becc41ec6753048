//! Inspect command implementation.

use super::open_store;
use clinisync_engine::{JournalStats, Stores, SyncStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Total entities.
    pub entity_count: usize,
    /// Entities per status.
    pub by_status: BTreeMap<String, usize>,
    /// Entities per type, with counts per status.
    pub by_type: BTreeMap<String, BTreeMap<String, usize>>,
    /// Open conflicts.
    pub conflict_count: usize,
    /// Last completed cycle, in milliseconds since the epoch.
    pub last_sync: Option<u64>,
    /// Digest over every entity's key and checksum.
    pub digest: String,
    /// Per-journal statistics.
    pub journals: Vec<JournalRow>,
}

/// Statistics for a single journal.
#[derive(Debug, Serialize)]
pub struct JournalRow {
    /// Journal name.
    pub name: String,
    /// Records, including superseded ones.
    pub records: u64,
    /// Live records.
    pub live: u64,
    /// Size in bytes.
    pub bytes: u64,
}

impl From<JournalStats> for JournalRow {
    fn from(stats: JournalStats) -> Self {
        Self {
            name: stats.name.to_string(),
            records: stats.records,
            live: stats.live,
            bytes: stats.bytes,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stores = open_store(path)?;
    let result = inspect(path, &stores)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path, stores: &Stores) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut by_status: BTreeMap<String, usize> = SyncStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let mut by_type: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    for entity in stores.entities.iter() {
        let status = entity.status.as_str().to_string();
        *by_status.entry(status.clone()).or_default() += 1;
        *by_type
            .entry(entity.entity_type().to_string())
            .or_default()
            .entry(status)
            .or_default() += 1;
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        entity_count: stores.entities.len(),
        by_status,
        by_type,
        conflict_count: stores.conflicts.len(),
        last_sync: stores.meta.last_sync().map(|t| t.as_millis()),
        digest: stores.entities.digest(),
        journals: stores
            .journal_stats()?
            .into_iter()
            .map(JournalRow::from)
            .collect(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Sync Store: {}", result.path);
    println!();

    println!("Entities: {}", result.entity_count);
    for (status, count) in &result.by_status {
        println!("  {status:<8} {count}");
    }
    println!();

    if !result.by_type.is_empty() {
        println!("By type:");
        for (entity_type, counts) in &result.by_type {
            let total: usize = counts.values().sum();
            let detail: Vec<String> = counts.iter().map(|(s, n)| format!("{s}={n}")).collect();
            println!("  {entity_type:<16} {total:>6}  ({})", detail.join(", "));
        }
        println!();
    }

    println!("Open conflicts: {}", result.conflict_count);
    match result.last_sync {
        Some(ms) => println!("Last sync:      {ms} ms since epoch"),
        None => println!("Last sync:      never"),
    }
    println!("Digest:         {}", result.digest);
    println!();

    println!("Journals:");
    for journal in &result.journals {
        println!(
            "  {:<10} {:>8} bytes  {:>6} records  {:>6} live",
            journal.name, journal.bytes, journal.records, journal.live
        );
    }
}
