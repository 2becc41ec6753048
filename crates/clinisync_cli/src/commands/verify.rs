//! Verify command implementation.

use super::open_store;
use clinisync_engine::Stores;
use clinisync_protocol::checksum;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of valid records.
    pub valid_records: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn check(&mut self, ok: bool, describe: impl FnOnce() -> String) {
        self.records_checked += 1;
        if ok {
            self.valid_records += 1;
        } else {
            self.errors.push(describe());
        }
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying sync store at {}", path.display());
    println!();

    println!("Replaying journals...");
    let stores = match open_store(path) {
        Ok(stores) => stores,
        Err(err) => {
            println!("  ✗ {err}");
            println!();
            println!("✗ Store verification failed");
            return Err("Verification failed".into());
        }
    };
    println!("  ✓ journals replayed");

    println!("Checking entity checksums...");
    let entities = verify_entities(&stores);
    print_result("Entities", &entities);

    println!("Checking conflict checksums...");
    let conflicts = verify_conflicts(&stores);
    print_result("Conflicts", &conflicts);

    println!();
    if entities.is_ok() && conflicts.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

fn verify_entities(stores: &Stores) -> VerifyResult {
    let mut result = VerifyResult::default();
    for entity in stores.entities.iter() {
        result.check(entity.verify(), || {
            format!("{}: checksum does not match payload", entity.key())
        });
    }
    result
}

fn verify_conflicts(stores: &Stores) -> VerifyResult {
    let mut result = VerifyResult::default();
    for conflict in stores.conflicts.list_all() {
        result.check(checksum(&conflict.local_payload) == conflict.local_checksum, || {
            format!("{}: local checksum does not match payload", conflict.key)
        });
        let remote_ok = match (&conflict.remote_payload, &conflict.remote_checksum) {
            (Some(payload), Some(sum)) => checksum(payload) == *sum,
            (None, _) => true,
            (Some(_), None) => false,
        };
        result.check(remote_ok, || {
            format!("{}: remote checksum does not match payload", conflict.key)
        });
    }
    result
}

fn print_result(name: &str, result: &VerifyResult) {
    if result.is_ok() {
        println!(
            "  ✓ {name}: {}/{} records valid",
            result.valid_records, result.records_checked
        );
    } else {
        println!(
            "  ✗ {name}: {} errors in {} records",
            result.errors.len(),
            result.records_checked
        );
        for error in &result.errors {
            println!("    - {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinisync_engine::{ConflictType, EntityKey, SyncConflict, SyncEntity, SyncStorage, Timestamp};

    #[test]
    fn clean_store_passes() {
        let mut stores = SyncStorage::in_memory().load().unwrap();
        let entity = SyncEntity::new(
            EntityKey::new("case", "c1"),
            br#"{"a":1}"#.to_vec(),
            1,
            Timestamp::from_millis(1),
        );
        stores.entities.upsert(entity).unwrap();

        let result = verify_entities(&stores);
        assert!(result.is_ok());
        assert_eq!(result.records_checked, 1);
    }

    #[test]
    fn mismatched_conflict_checksum_is_reported() {
        let mut stores = SyncStorage::in_memory().load().unwrap();
        stores
            .conflicts
            .record(SyncConflict {
                key: EntityKey::new("note", "n1"),
                local_payload: b"{}".to_vec(),
                local_checksum: "not-a-checksum".into(),
                remote_payload: Some(b"[]".to_vec()),
                remote_checksum: Some(checksum(b"[]")),
                conflict_type: ConflictType::Update,
                detected_at: Timestamp::from_millis(5),
            })
            .unwrap();

        let result = verify_conflicts(&stores);
        assert_eq!(result.records_checked, 2);
        assert_eq!(result.valid_records, 1);
        assert!(result.errors[0].contains("note/n1"));
    }
}
