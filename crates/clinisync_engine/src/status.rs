//! Cycle outcomes and engine status snapshots.

use clinisync_protocol::{SyncConflict, Timestamp};

/// Result of a sync trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cycle ran to completion.
    Completed {
        /// Entities acknowledged by the remote.
        synced: usize,
        /// Entities that failed or conflicted.
        errors: usize,
    },
    /// Offline; nothing was attempted.
    SkippedOffline,
    /// Another cycle was running; this trigger was a no-op.
    SkippedInProgress,
    /// The cycle stopped early on an unexpected failure.
    Aborted {
        /// Failure description.
        error: String,
    },
}

impl CycleOutcome {
    /// Returns true if a cycle actually started.
    pub fn ran(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Completed { .. } | CycleOutcome::Aborted { .. }
        )
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatusReport {
    /// Current connectivity.
    pub is_online: bool,
    /// Completion time of the last finished cycle.
    pub last_sync: Option<Timestamp>,
    /// Entities waiting for transmission.
    pub pending_count: usize,
    /// Entities in flight.
    pub syncing_count: usize,
    /// Entities acknowledged by the remote.
    pub synced_count: usize,
    /// Entities conflicted or out of retries.
    pub error_count: usize,
    /// All tracked entities.
    pub total_entities: usize,
    /// Open conflicts, oldest first.
    pub conflicts: Vec<SyncConflict>,
    /// Percentage processed by the current or last cycle.
    pub progress: f64,
    /// Whether a cycle is running.
    pub sync_in_progress: bool,
}
