#[cfg(feature = "sled")]
pub mod document;
#[cfg(feature = "duckdb")]
pub mod duckdb;
#[cfg(feature = "rusqlite")]
pub mod sqlite;
pub mod util;

use crate::{
    config::DatabaseConfig,
    generator::{Customer, Order, Product},
};
use indexmap::IndexMap;
use std::{
    error::Error as StdError,
    fmt::{self, Display},
    time::{Duration, Instant},
};
use thiserror::Error;

/// Native error of whatever driver sits below a backend
#[derive(Debug)]
pub struct DriverError(Box<dyn StdError + Send + Sync + 'static>);

impl DriverError {
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();

        Self(message.into())
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl StdError for DriverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(error: serde_json::Error) -> Self {
        Self(Box::new(error))
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(#[source] DriverError),
    #[error("Schema setup failed: {0}")]
    Schema(#[source] DriverError),
    #[error("Query failed: {0}")]
    Query(#[source] DriverError),
    #[error("Operation failed: {0}")]
    Operation(#[source] DriverError),
    #[error("Index on {table}.{column} already exists")]
    IndexExists { table: Table, column: String },
    #[error("Backend is not connected")]
    NotConnected,
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl BackendError {
    pub fn connection(error: impl Into<DriverError>) -> Self {
        Self::Connection(error.into())
    }

    pub fn schema(error: impl Into<DriverError>) -> Self {
        Self::Schema(error.into())
    }

    pub fn query(error: impl Into<DriverError>) -> Self {
        Self::Query(error.into())
    }

    pub fn operation(error: impl Into<DriverError>) -> Self {
        Self::Operation(error.into())
    }
}

/// The three logical tables (collections for the document store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Customers,
    Products,
    Orders,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Customers, Table::Products, Table::Orders];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Products => "products",
            Self::Orders => "orders",
        }
    }

    /// Columns that may carry a secondary index
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Customers => &["customer_id", "name", "email", "city", "created_at"],
            Self::Products => &["product_id", "name", "category", "price", "stock"],
            Self::Orders => &[
                "order_id",
                "customer_id",
                "product_id",
                "quantity",
                "order_date",
                "total_amount",
            ],
        }
    }

    /// Reject anything that is not a known column, column names end up in DDL
    pub fn check_column(&self, column: &str) -> Result<(), BackendError> {
        if self.columns().contains(&column) {
            Ok(())
        } else {
            Err(BackendError::operation(DriverError::msg(format!(
                "{self} has no column named {column}"
            ))))
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows for a single insert, typed by the table they belong to
#[derive(Debug, Clone, Copy)]
pub enum RowBatch<'a> {
    Customers(&'a [Customer]),
    Products(&'a [Product]),
    Orders(&'a [Order]),
}

impl RowBatch<'_> {
    pub fn table(&self) -> Table {
        match self {
            Self::Customers(_) => Table::Customers,
            Self::Products(_) => Table::Products,
            Self::Orders(_) => Table::Orders,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Customers(rows) => rows.len(),
            Self::Products(rows) => rows.len(),
            Self::Orders(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a backend expresses the cross-entity query, fixed per backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexQuery {
    Join,
    Aggregation,
}

/// Uniform operation surface every benchmarked database implements.
///
/// Timed operations return the elapsed time of the whole call, measured with
/// [`timed`], including the materialization of any result set.
pub trait DatabaseBackend {
    fn connect(&mut self) -> Result<(), BackendError>;

    /// Release the connection, never fails and is safe without a connection
    fn disconnect(&mut self);

    /// Drop and recreate customers, products and orders
    fn setup_schema(&mut self) -> Result<(), BackendError>;

    fn insert_batch(&mut self, rows: RowBatch<'_>) -> Result<Duration, BackendError>;

    fn select_simple(&mut self, limit: usize) -> Result<Duration, BackendError>;

    fn complex_query(&self) -> ComplexQuery;

    fn select_with_join(&mut self) -> Result<Duration, BackendError> {
        Err(BackendError::Unsupported("select with join"))
    }

    fn select_with_aggregation(&mut self) -> Result<Duration, BackendError> {
        Err(BackendError::Unsupported("select with aggregation"))
    }

    fn update_batch(&mut self, limit: usize) -> Result<Duration, BackendError>;

    fn delete_batch(&mut self, limit: usize) -> Result<Duration, BackendError>;

    /// Fails with [`BackendError::IndexExists`] if the index is already present
    fn create_index(&mut self, table: Table, column: &str) -> Result<(), BackendError>;

    fn table_size(&mut self, table: Table) -> Result<u64, BackendError>;
}

/// Run `operation` and return how long it took on the monotonic clock.
/// Whatever the operation returns is dropped after the clock stops.
pub fn timed<T, E, F>(operation: F) -> Result<Duration, E>
where
    F: FnOnce() -> Result<T, E>,
{
    let start = Instant::now();
    let output = operation()?;
    let elapsed = start.elapsed();
    drop(output);

    Ok(elapsed)
}

pub type BackendConstructor = Box<dyn Fn(&DatabaseConfig) -> Box<dyn DatabaseBackend>>;

/// Maps a backend kind as written in the config to its constructor
pub struct BackendRegistry {
    constructors: IndexMap<String, BackendConstructor>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// Registry with every backend compiled into this build
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();

        #[cfg(feature = "rusqlite")]
        registry.register("sqlite", |config| {
            Box::new(sqlite::SqliteBackend::new(config))
        });
        #[cfg(feature = "duckdb")]
        registry.register("duckdb", |config| {
            Box::new(duckdb::DuckDbBackend::new(config))
        });
        #[cfg(feature = "sled")]
        registry.register("document", |config| {
            Box::new(document::DocumentBackend::new(config))
        });

        registry
    }

    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&DatabaseConfig) -> Box<dyn DatabaseBackend> + 'static,
    {
        self.constructors
            .insert(kind.to_owned(), Box::new(constructor));
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn build(&self, config: &DatabaseConfig) -> Option<Box<dyn DatabaseBackend>> {
        self.constructors
            .get(&config.kind)
            .map(|constructor| constructor(config))
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
