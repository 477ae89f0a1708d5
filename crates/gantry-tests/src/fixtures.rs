//! Test fixtures for creating sample workflows and group catalogs.

use gantry_core::groups::{GroupCatalog, GroupDescriptor, TestGroup};
use gantry_core::workflow::WorkflowDefinition;

/// Factory for creating test workflows.
pub struct WorkflowFixture;

impl WorkflowFixture {
    /// A single lint job, no dependencies.
    pub fn simple() -> WorkflowDefinition {
        Self::parse(
            r#"
version: "1"
name: simple-ci
jobs:
  - name: lint
    steps:
      - name: lint
        run: tox run -e lint
"#,
        )
    }

    /// The full CI graph exercised by most tests: three root checks, a
    /// build gated behind them, a collector, and a fan-out integration
    /// job crossed with a two-value series matrix.
    pub fn router() -> WorkflowDefinition {
        Self::parse(
            r#"
version: "1"
name: router-ci
triggers:
  - type: pull_request
  - type: schedule
    cron: "0 0 7 * * * *"
concurrency:
  group: "${{ workflow }}-${{ ref }}"
  cancel_in_progress: true
jobs:
  - name: lint
    steps:
      - name: lint
        run: tox run -e lint

  - name: unit-test
    steps:
      - name: unit
        run: tox run -e unit

  - name: lib-check
    steps:
      - name: libs
        run: tox run -e lib-check

  - name: build
    needs: [lint, unit-test, lib-check]
    steps:
      - name: build
        run: make build

  - name: collect-integration-tests
    needs: [build]
    steps:
      - name: collect
        run: gantry collect
        outputs: [groups]
    outputs:
      groups: "${{ steps.collect.outputs.groups }}"

  - name: integration-test
    needs: [build, collect-integration-tests]
    fan_out:
      source: collect-integration-tests
      fail_fast: false
    matrix:
      dimensions:
        series: ["22.04", "24.04"]
      fail_fast: false
    steps:
      - name: run
        run: tox run -e integration -- ${{ matrix.group_path }}
"#,
        )
    }

    /// A linear two-job workflow: `build` then `test`.
    pub fn linear() -> WorkflowDefinition {
        Self::parse(
            r#"
version: "1"
name: linear-ci
jobs:
  - name: build
    steps:
      - name: build
        run: make build

  - name: test
    needs: [build]
    steps:
      - name: test
        run: make test
"#,
        )
    }

    fn parse(yaml: &str) -> WorkflowDefinition {
        serde_yaml::from_str(yaml).expect("fixture workflow must parse")
    }
}

/// Factory for group catalogs and descriptor lists.
pub struct GroupFixture;

impl GroupFixture {
    /// A catalog with three stable groups and one unstable one.
    pub fn catalog() -> GroupCatalog {
        GroupCatalog::new(vec![
            Self::group("1", "database-relations", false),
            Self::group("2", "tls", false),
            Self::group("3", "backup", false),
            Self::group("4", "exporter", true),
        ])
    }

    pub fn group(id: &str, name: &str, unstable: bool) -> TestGroup {
        TestGroup {
            id: id.to_string(),
            name: name.to_string(),
            path: format!("tests/integration/test_{}.py", name.replace('-', "_")),
            unstable,
        }
    }

    /// Encode a descriptor list the way a collector job publishes it.
    pub fn encoded(names: &[&str]) -> String {
        let descriptors: Vec<GroupDescriptor> = names
            .iter()
            .enumerate()
            .map(|(i, name)| GroupDescriptor {
                group: (i + 1).to_string(),
                name: name.to_string(),
                path: format!("tests/integration/test_{}.py", name.replace('-', "_")),
            })
            .collect();
        GroupDescriptor::encode_list(&descriptors).expect("descriptors must encode")
    }
}
