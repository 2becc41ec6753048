//! Selection of entities for listing and sync cycles.

use clinisync_protocol::{Priority, SyncEntity};

/// Restricts which entities a listing or sync cycle considers.
///
/// The default selects everything.
///
/// ```
/// use clinisync_engine::SyncFilter;
///
/// let filter = SyncFilter::all().with_types(["case", "session"]).with_max_priority(1);
/// assert_eq!(filter.max_priority, Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncFilter {
    /// Only these entity types, if set.
    pub entity_types: Option<Vec<String>>,
    /// Only priorities at or below this ceiling, if set.
    pub max_priority: Option<Priority>,
}

impl SyncFilter {
    /// Selects every entity.
    pub fn all() -> Self {
        Self::default()
    }

    /// Selects a single entity type.
    pub fn for_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_types: Some(vec![entity_type.into()]),
            max_priority: None,
        }
    }

    /// Restricts to the given entity types.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts to priorities at or below `ceiling`.
    pub fn with_max_priority(mut self, ceiling: Priority) -> Self {
        self.max_priority = Some(ceiling);
        self
    }

    /// Widens this filter to also select everything `other` selects.
    ///
    /// The result may select more than either input, never less.
    pub fn widen(&mut self, other: &SyncFilter) {
        self.entity_types = match (self.entity_types.take(), &other.entity_types) {
            (Some(mut mine), Some(theirs)) => {
                for entity_type in theirs {
                    if !mine.contains(entity_type) {
                        mine.push(entity_type.clone());
                    }
                }
                Some(mine)
            }
            _ => None,
        };
        self.max_priority = match (self.max_priority, other.max_priority) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
    }

    /// Returns true if the entity's type is selected.
    pub fn matches_type(&self, entity_type: &str) -> bool {
        self.entity_types
            .as_ref()
            .map_or(true, |types| types.iter().any(|t| t == entity_type))
    }

    /// Returns true if the entity passes every restriction.
    pub fn matches(&self, entity: &SyncEntity) -> bool {
        self.matches_type(entity.entity_type())
            && self.max_priority.map_or(true, |max| entity.priority <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_unions_types() {
        let mut filter = SyncFilter::for_type("note");
        filter.widen(&SyncFilter::for_type("case"));
        filter.widen(&SyncFilter::for_type("note"));
        assert_eq!(
            filter.entity_types,
            Some(vec!["note".to_string(), "case".to_string()])
        );
        assert!(!filter.matches_type("resource"));
    }

    #[test]
    fn widen_with_unrestricted_selects_all() {
        let mut filter = SyncFilter::for_type("note").with_max_priority(1);
        filter.widen(&SyncFilter::all());
        assert_eq!(filter, SyncFilter::all());
    }

    #[test]
    fn widen_keeps_the_higher_ceiling() {
        let mut filter = SyncFilter::all().with_max_priority(1);
        filter.widen(&SyncFilter::all().with_max_priority(3));
        assert_eq!(filter.max_priority, Some(3));
    }
}
