use super::{
    timed,
    util::{self, JOIN_QUERY},
    BackendError, ComplexQuery, DatabaseBackend, DriverError, RowBatch, Table,
};
use crate::config::DatabaseConfig;
use rusqlite::{params, Connection};
use std::time::Duration;
use tracing::{debug, error, info};

impl From<rusqlite::Error> for DriverError {
    fn from(error: rusqlite::Error) -> Self {
        DriverError(Box::new(error))
    }
}

#[derive(Debug)]
pub struct SqliteBackend {
    config: DatabaseConfig,
    connection: Option<Connection>,
}

impl SqliteBackend {
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

impl DatabaseBackend for SqliteBackend {
    fn connect(&mut self) -> Result<(), BackendError> {
        let path = self
            .config
            .get_str("path")
            .ok_or_else(|| {
                BackendError::connection(DriverError::msg(
                    "the sqlite backend requires parameter.path",
                ))
            })?
            .to_owned();

        let connection = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&path)
        }
        .map_err(BackendError::connection)?;

        // sqlite opens lazily, make sure the file is actually usable
        connection
            .query_row("select 1", [], |row| row.get::<_, i64>(0))
            .map_err(BackendError::connection)?;

        info!(path = %path, "SQLite connected");
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
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Giving up on closing the SQLite connection");

                return;
            }
        }

        info!("Closed SQLite connection");
    }

    fn setup_schema(&mut self) -> Result<(), BackendError> {
        let connection = self.connection()?;

        for (counter, statement) in SQL_SCHEMA.iter().enumerate() {
            match connection.execute(statement, []) {
                Ok(_) => debug!("Applied SQL schema ({}/{SQL_SCHEMA_NUMBER})", counter + 1),
                Err(error) => {
                    error!(error = ?error, statement = statement, "Failed to apply SQL schema ({}/{SQL_SCHEMA_NUMBER}): {error}", counter + 1);

                    return Err(BackendError::schema(error));
                }
            }
        }

        info!("SQLite schema created");

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
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, rusqlite::Error>>()
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
                        row.get::<_, i64>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, rusqlite::Error>>()
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
            Err(rusqlite::Error::SqliteFailure(_, Some(message)))
                if util::is_already_exists(&message) =>
            {
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

/// Insert all rows inside a single transaction
fn insert_rows(connection: &mut Connection, rows: RowBatch<'_>) -> Result<(), rusqlite::Error> {
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

// Foreign keys are declared but sqlite leaves them unenforced unless
// `pragma foreign_keys` is switched on, which keeps dangling order
// references insertable.
pub const SQL_SCHEMA: [&str; 6] = [
    "drop table if exists orders;",
    "drop table if exists customers;",
    "drop table if exists products;",
    "create table customers (
    customer_id integer primary key autoincrement,
    name varchar(100),
    email varchar(100),
    city varchar(50),
    created_at timestamp default current_timestamp
);",
    "create table products (
    product_id integer primary key autoincrement,
    name varchar(100),
    category varchar(50),
    price decimal(10, 2),
    stock integer
);",
    "create table orders (
    order_id integer primary key autoincrement,
    customer_id integer,
    product_id integer,
    quantity integer,
    order_date timestamp default current_timestamp,
    total_amount decimal(10, 2),
    foreign key (customer_id) references customers (customer_id),
    foreign key (product_id) references products (product_id)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DataGenerator;

    fn connected() -> SqliteBackend {
        let mut backend =
            SqliteBackend::new(&DatabaseConfig::new("sqlite").with_parameter("path", ":memory:"));
        backend.connect().unwrap();
        backend.setup_schema().unwrap();
        backend
    }

    #[test]
    pub fn connect_requires_path() {
        let mut backend = SqliteBackend::new(&DatabaseConfig::new("sqlite"));

        assert!(matches!(backend.connect(), Err(BackendError::Connection(_))));
        // still safe to release
        backend.disconnect();
    }

    #[test]
    pub fn operations_without_connection_fail() {
        let mut backend = SqliteBackend::new(&DatabaseConfig::new("sqlite"));

        assert!(matches!(
            backend.setup_schema(),
            Err(BackendError::NotConnected)
        ));
        assert!(matches!(
            backend.table_size(Table::Customers),
            Err(BackendError::NotConnected)
        ));
    }

    #[test]
    pub fn insert_update_delete_change_rows() {
        let dataset = DataGenerator::seeded(11).generate(120).unwrap();
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

        assert_eq!(backend.table_size(Table::Customers).unwrap(), 120);
        assert_eq!(backend.table_size(Table::Products).unwrap(), 60);
        assert_eq!(backend.table_size(Table::Orders).unwrap(), 240);

        let stock_before: i64 = backend
            .connection()
            .unwrap()
            .query_row("select sum(stock) from products", [], |row| row.get(0))
            .unwrap();
        backend.update_batch(500).unwrap();
        let stock_after: i64 = backend
            .connection()
            .unwrap()
            .query_row("select sum(stock) from products", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stock_before - stock_after, 60);

        backend.delete_batch(100).unwrap();
        assert_eq!(backend.table_size(Table::Orders).unwrap(), 140);

        backend.select_simple(1000).unwrap();
        backend.select_with_join().unwrap();
        backend.disconnect();
    }

    #[test]
    pub fn duplicate_index_is_reported_as_such() {
        let mut backend = connected();

        backend.create_index(Table::Customers, "city").unwrap();
        assert!(matches!(
            backend.create_index(Table::Customers, "city"),
            Err(BackendError::IndexExists { .. })
        ));
        assert!(matches!(
            backend.create_index(Table::Customers, "city; drop table orders"),
            Err(BackendError::Operation(_))
        ));
    }

    #[test]
    pub fn schema_setup_is_repeatable() {
        let dataset = DataGenerator::seeded(2).generate(10).unwrap();
        let mut backend = connected();

        backend
            .insert_batch(RowBatch::Customers(&dataset.customers))
            .unwrap();
        backend.create_index(Table::Customers, "city").unwrap();
        backend.setup_schema().unwrap();

        assert_eq!(backend.table_size(Table::Customers).unwrap(), 0);
        backend.create_index(Table::Customers, "city").unwrap();
    }
}
