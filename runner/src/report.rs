use crate::{
    config::{BenchmarkSettings, ConfigErrors},
    database::ComplexQuery,
};
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Serialize, Serializer};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
    time::Duration,
};
use tracing::{error, info};

/// Elapsed time, serialized as fractional seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Seconds(pub Duration);

impl Serialize for Seconds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0.as_secs_f64())
    }
}

impl From<Duration> for Seconds {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    InsertCustomers,
    InsertProducts,
    InsertOrders,
    SelectSimple,
    SelectJoin,
    SelectAggregation,
    UpdateBatch,
    DeleteBatch,
}

impl Operation {
    /// Same name as in the serialized report
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertCustomers => "insert_customers",
            Self::InsertProducts => "insert_products",
            Self::InsertOrders => "insert_orders",
            Self::SelectSimple => "select_simple",
            Self::SelectJoin => "select_join",
            Self::SelectAggregation => "select_aggregation",
            Self::UpdateBatch => "update_batch",
            Self::DeleteBatch => "delete_batch",
        }
    }

    pub fn for_query(query: ComplexQuery) -> Self {
        match query {
            ComplexQuery::Join => Self::SelectJoin,
            ComplexQuery::Aggregation => Self::SelectAggregation,
        }
    }
}

/// Timed CRUD operations in execution order, `None` for a tolerated failure
pub type CrudMetrics = IndexMap<Operation, Option<Seconds>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexingResult {
    pub without_index: Seconds,
    pub with_index: Seconds,
    pub improvement_percent: f64,
}

impl IndexingResult {
    pub fn new(without_index: Duration, with_index: Duration) -> Self {
        Self {
            without_index: without_index.into(),
            with_index: with_index.into(),
            improvement_percent: improvement_percent(without_index, with_index),
        }
    }
}

/// Relative speedup of `with` over `without`, 0 when there is no baseline
pub fn improvement_percent(without: Duration, with: Duration) -> f64 {
    if without.is_zero() {
        return 0.0;
    }

    let without = without.as_nanos() as f64;
    let with = with.as_nanos() as f64;

    (without - with) / without * 100.0
}

/// Everything measured for one backend. Sections the run never reached stay
/// absent from the serialized output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchmarkResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crud: Option<CrudMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexing: Option<IndexingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<IndexMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BenchmarkResult {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp: DateTime<Local>,
    pub config: BenchmarkSettings,
    pub databases: IndexMap<String, BenchmarkResult>,
}

impl RunReport {
    /// Write the report as pretty-printed JSON, creating missing parent directories
    pub fn write_json(&self, path: &Path) -> Result<(), ConfigErrors> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        info!(path = ?path, "Saved benchmark results");

        Ok(())
    }

    /// One line per backend with the headline numbers in milliseconds
    pub fn log_summary(&self) {
        info!(
            databases = self.databases.len(),
            dataset_size = self.config.dataset_size,
            "Benchmark summary"
        );

        for (name, result) in &self.databases {
            if let Some(error) = &result.error {
                error!(backend = %name, "{name}: failed with {error}");
                continue;
            }

            let timings = result
                .crud
                .iter()
                .flatten()
                .map(|(operation, elapsed)| {
                    let value = elapsed
                        .map(|elapsed| format!("{:.2}ms", elapsed.0.as_secs_f64() * 1000.0))
                        .unwrap_or_else(|| "failed".to_owned());
                    format!("{}={value}", operation.as_str())
                })
                .join(" ");
            let improvement = result
                .indexing
                .as_ref()
                .map(|indexing| indexing.improvement_percent)
                .unwrap_or_default();

            info!(backend = %name, "{name}: {timings} index_improvement={improvement:.1}%");
        }
    }
}

/// Collects per-backend results in the order they were benchmarked
#[derive(Debug)]
pub struct ResultsAggregator {
    timestamp: DateTime<Local>,
    config: BenchmarkSettings,
    databases: IndexMap<String, BenchmarkResult>,
}

impl ResultsAggregator {
    pub fn new(config: BenchmarkSettings) -> Self {
        Self {
            timestamp: Local::now(),
            config,
            databases: IndexMap::new(),
        }
    }

    pub fn record(&mut self, name: &str, result: BenchmarkResult) {
        if self.databases.insert(name.to_owned(), result).is_some() {
            error!(backend = %name, "Backend {name} was recorded twice, keeping the latest result");
        }
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            timestamp: self.timestamp,
            config: self.config,
            databases: self.databases,
        }
    }
}

#[cfg(test)]
#[path = "report_test.rs"]
mod report_test;
