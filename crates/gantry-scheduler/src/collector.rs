//! Dynamic test-group collection.
//!
//! The collector inspects the run's stability filter and selects groups
//! from the catalog, emitting descriptors as a structured output value.
//! The filter itself is computed once per run (`StabilityFilter::for_context`)
//! and handed in here, so the collector and the fan-out instances always
//! agree on it.

use gantry_core::context::StabilityFilter;
use gantry_core::groups::{GroupCatalog, GroupDescriptor};
use gantry_core::Result;

/// Result of a collection pass.
#[derive(Debug, Clone)]
pub struct Collection {
    pub groups: Vec<GroupDescriptor>,
    pub filter: StabilityFilter,
    /// Number of catalog entries removed by the filter.
    pub excluded: usize,
}

impl Collection {
    /// Encode the selected groups the way the collector job publishes
    /// them: a JSON list in a single output value.
    pub fn encode(&self) -> Result<String> {
        GroupDescriptor::encode_list(&self.groups)
    }
}

/// Selects test groups from a catalog according to the run's filter.
pub struct GroupCollector {
    catalog: GroupCatalog,
}

impl GroupCollector {
    pub fn new(catalog: GroupCatalog) -> Self {
        Self { catalog }
    }

    /// Select groups for a run.
    ///
    /// Scheduled runs receive the whole catalog; everything else drops
    /// groups marked unstable.
    pub fn collect(&self, filter: StabilityFilter) -> Collection {
        let total = self.catalog.len();
        let groups: Vec<GroupDescriptor> = self
            .catalog
            .groups
            .iter()
            .filter(|g| !(filter.excludes_unstable() && g.unstable))
            .map(GroupDescriptor::from)
            .collect();

        let excluded = total - groups.len();
        Collection {
            groups,
            filter,
            excluded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::groups::TestGroup;

    fn catalog() -> GroupCatalog {
        GroupCatalog::new(vec![
            TestGroup {
                id: "1".to_string(),
                name: "database-relations".to_string(),
                path: "tests/integration/test_database.py".to_string(),
                unstable: false,
            },
            TestGroup {
                id: "1".to_string(),
                name: "tls".to_string(),
                path: "tests/integration/test_tls.py".to_string(),
                unstable: false,
            },
            TestGroup {
                id: "1".to_string(),
                name: "exporter".to_string(),
                path: "tests/integration/test_exporter.py".to_string(),
                unstable: true,
            },
        ])
    }

    #[test]
    fn test_exclude_unstable() {
        let collection = GroupCollector::new(catalog()).collect(StabilityFilter::ExcludeUnstable);
        assert_eq!(collection.groups.len(), 2);
        assert_eq!(collection.excluded, 1);
        assert!(collection.groups.iter().all(|g| g.name != "exporter"));
    }

    #[test]
    fn test_include_unstable_on_schedule() {
        let collection = GroupCollector::new(catalog()).collect(StabilityFilter::IncludeUnstable);
        assert_eq!(collection.groups.len(), 3);
        assert_eq!(collection.excluded, 0);
    }

    #[test]
    fn test_encoded_output_round_trips() {
        let collection = GroupCollector::new(catalog()).collect(StabilityFilter::ExcludeUnstable);
        let encoded = collection.encode().unwrap();
        let decoded = GroupDescriptor::decode_list(&encoded).unwrap();
        assert_eq!(decoded, collection.groups);
    }

    #[test]
    fn test_empty_catalog_yields_empty_collection() {
        let collection =
            GroupCollector::new(GroupCatalog::default()).collect(StabilityFilter::ExcludeUnstable);
        assert!(collection.groups.is_empty());
    }
}
