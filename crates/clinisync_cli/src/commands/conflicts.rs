//! Conflicts command implementation.

use super::open_store;
use clinisync_engine::SyncConflict;
use serde::Serialize;
use std::path::Path;

/// One open conflict, as printed.
#[derive(Debug, Serialize)]
pub struct ConflictRow {
    /// Entity type.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: String,
    /// `create`, `update` or `delete`.
    pub conflict_type: String,
    /// Detection time, in milliseconds since the epoch.
    pub detected_at: u64,
    /// Checksum of the payload this client pushed.
    pub local_checksum: String,
    /// Checksum the remote holds; absent if it deleted the entity.
    pub remote_checksum: Option<String>,
    /// The payload this client pushed, if it is UTF-8.
    pub local_payload: Option<String>,
    /// The remote payload, if present and UTF-8.
    pub remote_payload: Option<String>,
}

impl From<&SyncConflict> for ConflictRow {
    fn from(conflict: &SyncConflict) -> Self {
        Self {
            entity_type: conflict.key.entity_type.clone(),
            entity_id: conflict.key.id.clone(),
            conflict_type: conflict.conflict_type.as_str().to_string(),
            detected_at: conflict.detected_at.as_millis(),
            local_checksum: conflict.local_checksum.clone(),
            remote_checksum: conflict.remote_checksum.clone(),
            local_payload: String::from_utf8(conflict.local_payload.clone()).ok(),
            remote_payload: conflict
                .remote_payload
                .as_ref()
                .and_then(|p| String::from_utf8(p.clone()).ok()),
        }
    }
}

/// Runs the conflicts command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stores = open_store(path)?;
    let rows: Vec<ConflictRow> = stores
        .conflicts
        .list_all()
        .iter()
        .map(ConflictRow::from)
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            println!("{} open conflicts", rows.len());
            for row in &rows {
                println!();
                println!(
                    "{}/{} ({}) detected at {}",
                    row.entity_type, row.entity_id, row.conflict_type, row.detected_at
                );
                println!(
                    "  local:  {} {}",
                    row.local_checksum,
                    row.local_payload.as_deref().unwrap_or("<binary>")
                );
                match (&row.remote_checksum, &row.remote_payload) {
                    (None, _) => println!("  remote: <deleted>"),
                    (Some(checksum), payload) => println!(
                        "  remote: {checksum} {}",
                        payload.as_deref().unwrap_or("<binary>")
                    ),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinisync_engine::{ConflictType, EntityKey, Timestamp};

    #[test]
    fn row_marks_remote_delete() {
        let conflict = SyncConflict {
            key: EntityKey::new("case", "c1"),
            local_payload: br#"{"v":1}"#.to_vec(),
            local_checksum: "abc".into(),
            remote_payload: None,
            remote_checksum: None,
            conflict_type: ConflictType::Delete,
            detected_at: Timestamp::from_millis(42),
        };
        let row = ConflictRow::from(&conflict);
        assert_eq!(row.conflict_type, "delete");
        assert_eq!(row.local_payload.as_deref(), Some(r#"{"v":1}"#));
        assert!(row.remote_payload.is_none());
        assert_eq!(row.detected_at, 42);
    }
}
