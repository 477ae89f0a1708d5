//! CLI configuration management.

use crate::executor::BoxError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default workflow file.
    #[serde(default = "default_workflow_file")]
    pub workflow_file: String,
    /// Default test-group catalog.
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_workflow_file() -> String {
    "gantry.yaml".to_string()
}

fn default_catalog_file() -> String {
    "tests/integration/groups.yaml".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            workflow_file: default_workflow_file(),
            catalog_file: default_catalog_file(),
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self, BoxError> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), BoxError> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, BoxError> {
        let dirs = directories::ProjectDirs::from("dev", "gantry", "gantry")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "workflow_file" => self.workflow_file = value.to_string(),
            "catalog_file" => self.catalog_file = value.to_string(),
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}
