use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to access file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to serialize results: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    pub benchmark: BenchmarkSettings,
    // databases are benchmarked in the order they are listed
    #[serde(alias = "db")]
    pub databases: IndexMap<String, DatabaseConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Settings copied verbatim into the report
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkSettings {
    pub dataset_size: usize,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    // pause after connecting before the schema is touched
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    // Name of the backend implementation, see `BackendRegistry` for the selection process
    pub kind: String,
    // connection parameters, interpreted by the backend when it connects
    #[serde(default)]
    pub parameter: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_json_results")]
    pub json_results: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_results: default_json_results(),
        }
    }
}

impl DatabaseConfig {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            parameter: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.parameter.insert(key.to_owned(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.parameter.get(key).and_then(|value| value.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.parameter.get(key).and_then(|value| value.as_bool())
    }
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        debug!(path = ?path, "Loading configuration");

        Ok(serde_yaml::from_reader(File::open(path)?)?)
    }

    pub fn from_yaml(source: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Keep only the named databases, in their configured order
    pub fn retain_databases(&mut self, names: &[String]) -> Result<(), ConfigErrors> {
        let unknown = names
            .iter()
            .filter(|name| !self.databases.contains_key(name.as_str()))
            .join(", ");

        if !unknown.is_empty() {
            error!("Requested databases are not configured: {unknown}");

            return Err(ConfigErrors::InvalidConfiguration(format!(
                "unknown databases requested: {unknown}"
            )));
        }

        self.databases.retain(|name, _| names.contains(name));

        Ok(())
    }

    /// Check everything up front and report all problems at once instead of
    /// failing on the first one
    pub fn preflight_checks(&self, known_kinds: &[&str]) -> Result<(), ConfigErrors> {
        let mut problems = Vec::new();

        if self.benchmark.dataset_size == 0 {
            error!("benchmark.dataset_size must be a positive number of records");
            problems.push("benchmark.dataset_size is 0".to_owned());
        }

        if self.benchmark.iterations == 0 {
            error!("benchmark.iterations cannot be 0");
            problems.push("benchmark.iterations is 0".to_owned());
        }

        if self.databases.is_empty() {
            error!("No database was defined, there is nothing to benchmark");
            problems.push("no databases configured".to_owned());
        }

        for (name, database) in self.databases.iter() {
            if !known_kinds.contains(&database.kind.as_str()) {
                error!(
                    "databases.{name}.kind ({}) is not supported, please use one of: {}",
                    database.kind,
                    known_kinds.iter().join(", ")
                );
                problems.push(format!("databases.{name}.kind '{}' unknown", database.kind));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors::InvalidConfiguration(problems.join("; ")))
        }
    }
}

fn default_iterations() -> u32 {
    1
}

fn default_settle_millis() -> u64 {
    1000
}

fn default_json_results() -> PathBuf {
    PathBuf::from("results/benchmark_results.json")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
