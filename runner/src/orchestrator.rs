use crate::{
    config::{BenchConfig, ConfigErrors},
    database::{BackendError, BackendRegistry, ComplexQuery, DatabaseBackend, RowBatch, Table},
    generator::{DataGenerator, SyntheticDataset},
    report::{
        BenchmarkResult, CrudMetrics, IndexingResult, Operation, ResultsAggregator, RunReport,
    },
};
use indexmap::IndexMap;
use std::{thread, time::Duration};
use tracing::{debug, error, info, instrument, warn};

const CUSTOMER_BATCH: usize = 1000;
const PRODUCT_BATCH: usize = 500;
const ORDER_BATCH: usize = 2000;
const SELECT_LIMIT: usize = 1000;
const UPDATE_LIMIT: usize = 500;
const DELETE_LIMIT: usize = 100;

/// Columns indexed for the index-impact test
pub const INDEXED_COLUMNS: [(Table, &str); 2] =
    [(Table::Customers, "city"), (Table::Orders, "customer_id")];

/// Lifecycle of a single backend run, `Errored` can follow any non-terminal stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Connected,
    SchemaReady,
    CrudDone,
    IndexingDone,
    TornDown,
    Errored,
}

impl Stage {
    fn advance(&mut self, backend: &str, next: Stage) {
        debug!(backend = %backend, from = ?self, to = ?next, "Stage transition");
        *self = next;
    }
}

/// Drives every configured backend through the benchmark, one at a time
#[derive(Debug)]
pub struct BenchmarkOrchestrator {
    config: BenchConfig,
    registry: BackendRegistry,
}

impl BenchmarkOrchestrator {
    /// Fails if the configuration does not pass the preflight checks against
    /// the kinds known to `registry`
    pub fn new(config: BenchConfig, registry: BackendRegistry) -> Result<Self, ConfigErrors> {
        config.preflight_checks(&registry.kinds())?;

        Ok(Self { config, registry })
    }

    /// Benchmark all configured backends in configuration order against one
    /// shared dataset. Backend failures end up in the report, only dataset
    /// generation can fail the whole run.
    pub fn run_all(&self) -> Result<RunReport, ConfigErrors> {
        let settings = &self.config.benchmark;
        let dataset = match settings.seed {
            Some(seed) => DataGenerator::seeded(seed).generate(settings.dataset_size)?,
            None => DataGenerator::new().generate(settings.dataset_size)?,
        };
        let mut aggregator = ResultsAggregator::new(settings.clone());

        for (name, database) in &self.config.databases {
            info!(backend = %name, kind = %database.kind, "Benchmarking {name}");

            let result = match self.registry.build(database) {
                Some(mut backend) => self.benchmark_backend(name, backend.as_mut(), &dataset),
                None => {
                    error!(backend = %name, "No backend registered for kind {}", database.kind);

                    BenchmarkResult {
                        error: Some(format!("unknown backend kind {}", database.kind)),
                        ..Default::default()
                    }
                }
            };

            aggregator.record(name, result);
        }

        Ok(aggregator.into_report())
    }

    /// Run the full pipeline on one backend. Never fails: an error aborts the
    /// remaining stages and is stored in the result next to whatever was
    /// measured before. The backend is disconnected exactly once.
    #[instrument(skip(self, backend, dataset), level = "info")]
    pub fn benchmark_backend(
        &self,
        name: &str,
        backend: &mut dyn DatabaseBackend,
        dataset: &SyntheticDataset,
    ) -> BenchmarkResult {
        let mut result = BenchmarkResult::default();
        let mut stage = Stage::Idle;

        if let Err(error) = self.run_stages(name, backend, dataset, &mut result, &mut stage) {
            error!(backend = %name, stage = ?stage, error = ?error, "Benchmark of {name} failed: {error}");
            stage.advance(name, Stage::Errored);
            result.error = Some(error.to_string());
        }

        backend.disconnect();
        stage.advance(name, Stage::TornDown);

        result
    }

    fn run_stages(
        &self,
        name: &str,
        backend: &mut dyn DatabaseBackend,
        dataset: &SyntheticDataset,
        result: &mut BenchmarkResult,
        stage: &mut Stage,
    ) -> Result<(), BackendError> {
        backend.connect()?;
        stage.advance(name, Stage::Connected);

        let settle = Duration::from_millis(self.config.benchmark.settle_millis);
        if !settle.is_zero() {
            debug!(backend = %name, "Waiting {settle:?} for the backend to settle");
            thread::sleep(settle);
        }

        backend.setup_schema()?;
        stage.advance(name, Stage::SchemaReady);

        result.crud = Some(run_crud(name, backend, dataset)?);
        stage.advance(name, Stage::CrudDone);

        result.indexing = Some(run_indexing(name, backend)?);
        stage.advance(name, Stage::IndexingDone);

        let mut stats = IndexMap::new();
        for table in Table::ALL {
            stats.insert(format!("{table}_count"), backend.table_size(table)?);
        }
        result.stats = Some(stats);

        Ok(())
    }
}

fn capped<T>(rows: &[T], cap: usize) -> &[T] {
    &rows[..rows.len().min(cap)]
}

fn complex_query(
    backend: &mut dyn DatabaseBackend,
    query: ComplexQuery,
) -> Result<Duration, BackendError> {
    match query {
        ComplexQuery::Join => backend.select_with_join(),
        ComplexQuery::Aggregation => backend.select_with_aggregation(),
    }
}

fn run_crud(
    name: &str,
    backend: &mut dyn DatabaseBackend,
    dataset: &SyntheticDataset,
) -> Result<CrudMetrics, BackendError> {
    let mut crud = CrudMetrics::new();
    let mut record = |operation: Operation, elapsed: Option<Duration>| {
        debug!(backend = %name, operation = operation.as_str(), elapsed = ?elapsed, "Timed operation");
        crud.insert(operation, elapsed.map(Into::into));
    };

    let customers = RowBatch::Customers(capped(&dataset.customers, CUSTOMER_BATCH));
    record(Operation::InsertCustomers, Some(backend.insert_batch(customers)?));
    let products = RowBatch::Products(capped(&dataset.products, PRODUCT_BATCH));
    record(Operation::InsertProducts, Some(backend.insert_batch(products)?));
    let orders = RowBatch::Orders(capped(&dataset.orders, ORDER_BATCH));
    record(Operation::InsertOrders, Some(backend.insert_batch(orders)?));

    record(Operation::SelectSimple, Some(backend.select_simple(SELECT_LIMIT)?));

    let query = backend.complex_query();
    let elapsed = match complex_query(backend, query) {
        Ok(elapsed) => Some(elapsed),
        Err(error) => {
            warn!(backend = %name, error = ?error, "Complex query on {name} failed, continuing: {error}");
            None
        }
    };
    record(Operation::for_query(query), elapsed);

    record(Operation::UpdateBatch, Some(backend.update_batch(UPDATE_LIMIT)?));
    record(Operation::DeleteBatch, Some(backend.delete_batch(DELETE_LIMIT)?));

    Ok(crud)
}

/// The join where there is one, document stores fall back to the simple select
fn baseline(backend: &mut dyn DatabaseBackend) -> Result<Duration, BackendError> {
    match backend.complex_query() {
        ComplexQuery::Join => backend.select_with_join(),
        ComplexQuery::Aggregation => backend.select_simple(SELECT_LIMIT),
    }
}

/// Time the same query before and after creating the secondary indexes
fn run_indexing(
    name: &str,
    backend: &mut dyn DatabaseBackend,
) -> Result<IndexingResult, BackendError> {
    let without_index = baseline(backend)?;

    for (table, column) in INDEXED_COLUMNS {
        match backend.create_index(table, column) {
            Ok(()) => {}
            Err(BackendError::IndexExists { .. }) => {
                info!(backend = %name, "Index on {table}.{column} already exists, keeping it");
            }
            Err(error) => return Err(error),
        }
    }

    let with_index = baseline(backend)?;
    let indexing = IndexingResult::new(without_index, with_index);

    info!(
        backend = %name,
        improvement = indexing.improvement_percent,
        "Index impact on {name}: {without_index:?} -> {with_index:?}"
    );

    Ok(indexing)
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
