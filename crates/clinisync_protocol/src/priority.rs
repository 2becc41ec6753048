//! Entity priorities.

/// Transmission priority; lower values are sent first.
pub type Priority = u32;

/// The most urgent priority, used for re-enqueued conflict resolutions.
pub const HIGHEST_PRIORITY: Priority = 0;

/// Returns the default priority for an entity type.
///
/// Clinical records go first, reference material next, analytics last.
/// Unknown types share the middle tier.
#[must_use]
pub fn default_priority(entity_type: &str) -> Priority {
    match entity_type {
        "case" | "competency" | "session" => 1,
        "resource" | "notification" => 2,
        "analytics" => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clinical_types_outrank_analytics() {
        assert_eq!(default_priority("case"), 1);
        assert_eq!(default_priority("session"), 1);
        assert_eq!(default_priority("notification"), 2);
        assert_eq!(default_priority("analytics"), 3);
        assert_eq!(default_priority("note"), 2);
        assert!(HIGHEST_PRIORITY < default_priority("case"));
    }
}
