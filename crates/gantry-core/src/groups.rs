//! Test group catalog and descriptors.
//!
//! The catalog is the discoverable universe of integration-test groups;
//! the collector job filters it by stability and emits `GroupDescriptor`s
//! as a structured output value consumed by the fan-out job.

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A discoverable test group, as declared in the catalog file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TestGroup {
    /// Group identifier, unique within its module path.
    pub id: String,
    pub name: String,
    /// Test module path, e.g. `tests/integration/test_database.py`.
    pub path: String,
    #[serde(default)]
    pub unstable: bool,
}

/// Catalog of all test groups a workflow can fan out over.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GroupCatalog {
    pub groups: Vec<TestGroup>,
}

impl GroupCatalog {
    pub fn new(groups: Vec<TestGroup>) -> Self {
        Self { groups }
    }

    /// Load a catalog from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::InvalidGroupList(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// One element of the collector's output value: identifier, human
/// readable name, and file path of a selected test group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GroupDescriptor {
    pub group: String,
    pub name: String,
    pub path: String,
}

impl GroupDescriptor {
    /// Serialize a descriptor list the way the collector publishes it.
    pub fn encode_list(groups: &[GroupDescriptor]) -> Result<String> {
        Ok(serde_json::to_string(groups)?)
    }

    /// Deserialize a published descriptor list.
    pub fn decode_list(raw: &str) -> Result<Vec<GroupDescriptor>> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidGroupList(e.to_string()))
    }
}

impl From<&TestGroup> for GroupDescriptor {
    fn from(group: &TestGroup) -> Self {
        Self {
            group: group.id.clone(),
            name: group.name.clone(),
            path: group.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_from_yaml() {
        let yaml = r#"
groups:
  - id: "1"
    name: database-relations
    path: tests/integration/test_database.py
  - id: "2"
    name: exporter
    path: tests/integration/test_exporter.py
    unstable: true
"#;
        let catalog = GroupCatalog::from_yaml(yaml).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.groups[1].unstable);
    }

    #[test]
    fn test_descriptor_round_trip() {
        let groups = vec![GroupDescriptor {
            group: "1".to_string(),
            name: "database-relations".to_string(),
            path: "tests/integration/test_database.py".to_string(),
        }];
        let encoded = GroupDescriptor::encode_list(&groups).unwrap();
        let decoded = GroupDescriptor::decode_list(&encoded).unwrap();
        assert_eq!(decoded, groups);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(GroupDescriptor::decode_list("not json").is_err());
    }
}
