use super::{
    timed,
    util::{self, JOIN_QUERY},
    BackendError, ComplexQuery, DatabaseBackend, DriverError, RowBatch, Table,
};
use crate::config::DatabaseConfig;
use ::duckdb::{params, Connection};
use std::time::Duration;
use tracing::{debug, error, info, trace};

impl From<::duckdb::Error> for DriverError {
    fn from(error: ::duckdb::Error) -> Self {
        DriverError(Box::new(error))
    }
}

#[derive(Debug)]
pub struct DuckDbBackend {
    config: DatabaseConfig,
    connection: Option<Connection>,
}

impl DuckDbBackend {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            config: config.clone(),
            connection: None,
        }
    }

    fn connection(&mut self) -> Result<&mut Connection, BackendError> {
        self.connection.as_mut().ok_or(BackendError::NotConnected)
    }
}

impl DatabaseBackend for DuckDbBackend {
    fn connect(&mut self) -> Result<(), BackendError> {
        let path = self
            .config
            .get_str("path")
            .ok_or_else(|| {
                BackendError::connection(DriverError::msg(
                    "the duckdb backend requires parameter.path",
                ))
            })?
            .to_owned();

        let connection = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&path)
        }
        .map_err(BackendError::connection)?;

        info!(path = %path, "DuckDB connected");
        self.connection = Some(connection);

        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        let mut counter = 0;
        while let Err((returned, error)) = connection.close() {
            counter += 1;
            connection = returned;
            error!(error = ?error, "Failed to close duckdb connection: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Giving up on closing the DuckDB connection");

                return;
            }
        }

        info!("Closed DuckDB connection");
    }

    fn setup_schema(&mut self) -> Result<(), BackendError> {
        let connection = self.connection()?;

        for (counter, statement) in SQL_SCHEMA.iter().enumerate() {
            match connection.execute(statement, []) {
                Ok(_) => debug!("Applied SQL schema ({}/{SQL_SCHEMA_NUMBER})", counter + 1),
                Err(error) => {
                    error!("Failed to apply SQL schema ({}/{SQL_SCHEMA_NUMBER}): {error}", counter + 1);
                    trace!("schema: {statement}");

                    return Err(BackendError::schema(error));
                }
            }
        }

        info!("DuckDB schema created");

        Ok(())
    }

    fn insert_batch(&mut self, rows: RowBatch<'_>) -> Result<Duration, BackendError> {
        let connection = self.connection()?;

        timed(|| insert_rows(connection, rows)).map_err(BackendError::operation)
    }

    fn select_simple(&mut self, limit: usize) -> Result<Duration, BackendError> {
        let connection = self.connection()?;

        timed(|| {
            connection
                .prepare_cached(&util::select_simple_query(limit))?
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, ::duckdb::Error>>()
        })
        .map_err(BackendError::query)
    }

    fn complex_query(&self) -> ComplexQuery {
        ComplexQuery::Join
    }

    fn select_with_join(&mut self) -> Result<Duration, BackendError> {
        let connection = self.connection()?;

        timed(|| {
            connection
                .prepare_cached(JOIN_QUERY)?
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i32>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, ::duckdb::Error>>()
        })
        .map_err(BackendError::query)
    }

    fn update_batch(&mut self, limit: usize) -> Result<Duration, BackendError> {
        let connection = self.connection()?;

        timed(|| connection.execute(&util::update_query(limit), []))
            .map_err(BackendError::operation)
    }

    fn delete_batch(&mut self, limit: usize) -> Result<Duration, BackendError> {
        let connection = self.connection()?;

        timed(|| connection.execute(&util::delete_query(limit), []))
            .map_err(BackendError::operation)
    }

    fn create_index(&mut self, table: Table, column: &str) -> Result<(), BackendError> {
        table.check_column(column)?;
        let connection = self.connection()?;

        match connection.execute(&util::create_index_query(table, column), []) {
            Ok(_) => {
                info!(index = %util::index_name(table, column), "Created index");

                Ok(())
            }
            Err(error) if util::is_already_exists(&error.to_string()) => {
                Err(BackendError::IndexExists {
                    table,
                    column: column.to_owned(),
                })
            }
            Err(error) => Err(BackendError::operation(error)),
        }
    }

    fn table_size(&mut self, table: Table) -> Result<u64, BackendError> {
        let connection = self.connection()?;

        connection
            .query_row(&util::count_query(table), [], |row| row.get::<_, i64>(0))
            .map(|count| count as u64)
            .map_err(BackendError::operation)
    }
}

fn insert_rows(connection: &mut Connection, rows: RowBatch<'_>) -> Result<(), ::duckdb::Error> {
    let tx = connection.transaction()?;

    {
        match rows {
            RowBatch::Customers(customers) => {
                let mut statement = tx.prepare_cached(util::INSERT_CUSTOMER)?;
                for customer in customers {
                    statement.execute(params![customer.name, customer.email, customer.city])?;
                }
            }
            RowBatch::Products(products) => {
                let mut statement = tx.prepare_cached(util::INSERT_PRODUCT)?;
                for product in products {
                    statement.execute(params![
                        product.name,
                        product.category,
                        product.price,
                        product.stock
                    ])?;
                }
            }
            RowBatch::Orders(orders) => {
                let mut statement = tx.prepare_cached(util::INSERT_ORDER)?;
                for order in orders {
                    statement.execute(params![
                        order.customer_ref,
                        order.product_ref,
                        order.quantity,
                        order.total_amount
                    ])?;
                }
            }
        }
    }

    tx.commit()
}

// ref: https://duckdb.org/docs/sql/statements/create_sequence.html
// Orders carry no foreign keys here: duckdb enforces them on insert and
// generated orders may reference customers beyond the inserted prefix.
pub const SQL_SCHEMA: [&str; 12] = [
    "drop table if exists orders;",
    "drop table if exists customers;",
    "drop table if exists products;",
    "drop sequence if exists seq_customers;",
    "drop sequence if exists seq_products;",
    "drop sequence if exists seq_orders;",
    "create sequence seq_customers start 1 no cycle;",
    "create sequence seq_products start 1 no cycle;",
    "create sequence seq_orders start 1 no cycle;",
    "create table customers (
    customer_id integer primary key default(nextval('seq_customers')),
    name varchar(100),
    email varchar(100),
    city varchar(50),
    created_at timestamp default current_timestamp
);",
    "create table products (
    product_id integer primary key default(nextval('seq_products')),
    name varchar(100),
    category varchar(50),
    price decimal(10, 2),
    stock integer
);",
    "create table orders (
    order_id integer primary key default(nextval('seq_orders')),
    customer_id integer,
    product_id integer,
    quantity integer,
    order_date timestamp default current_timestamp,
    total_amount decimal(10, 2)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DataGenerator;

    fn connected() -> DuckDbBackend {
        let mut backend =
            DuckDbBackend::new(&DatabaseConfig::new("duckdb").with_parameter("path", ":memory:"));
        backend.connect().unwrap();
        backend.setup_schema().unwrap();
        backend
    }

    #[test]
    pub fn connect_requires_path() {
        let mut backend = DuckDbBackend::new(&DatabaseConfig::new("duckdb"));

        assert!(matches!(backend.connect(), Err(BackendError::Connection(_))));
        backend.disconnect();
    }

    #[test]
    pub fn crud_round_changes_rows() {
        let dataset = DataGenerator::seeded(8).generate(150).unwrap();
        let mut backend = connected();

        backend
            .insert_batch(RowBatch::Customers(&dataset.customers))
            .unwrap();
        backend
            .insert_batch(RowBatch::Products(&dataset.products))
            .unwrap();
        backend
            .insert_batch(RowBatch::Orders(&dataset.orders))
            .unwrap();
        assert_eq!(backend.table_size(Table::Orders).unwrap(), 300);

        backend.select_simple(1000).unwrap();
        backend.select_with_join().unwrap();
        backend.update_batch(500).unwrap();
        backend.delete_batch(100).unwrap();

        assert_eq!(backend.table_size(Table::Customers).unwrap(), 150);
        assert_eq!(backend.table_size(Table::Products).unwrap(), 75);
        assert_eq!(backend.table_size(Table::Orders).unwrap(), 200);
        backend.disconnect();
    }

    #[test]
    pub fn duplicate_index_is_reported_as_such() {
        let mut backend = connected();

        backend.create_index(Table::Orders, "customer_id").unwrap();
        assert!(matches!(
            backend.create_index(Table::Orders, "customer_id"),
            Err(BackendError::IndexExists { .. })
        ));
    }
}
