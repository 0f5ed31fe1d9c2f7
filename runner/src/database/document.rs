//! Document store backend on top of `sled`.
//!
//! Every collection is a tree of JSON documents keyed by a big-endian `u64`
//! id. Ids come from a per-collection sequence starting at 1, so an order's
//! `customer_id` points at the customer document the same way a foreign key
//! would.
//!
//! # Trees
//!
//! ```text
//! customers | products | orders      id -> document
//! sequences                          collection -> last id
//! indexes                            "{collection}.{field}" -> ()
//! index.{collection}.{field}         "{json value}\0{id}" -> ()
//! ```
//!
//! The store has no joins, the cross-collection query looks up the customer
//! and product of every order, in the spirit of a `$lookup` pipeline.

use super::{
    timed, BackendError, ComplexQuery, DatabaseBackend, DriverError, RowBatch, Table,
};
use crate::config::DatabaseConfig;
use itertools::Itertools;
use serde_json::{json, Value};
use sled::{Batch, Db, Tree};
use std::{cmp::Reverse, time::Duration};
use tracing::{debug, error, info};

const SEQUENCES: &str = "sequences";
const INDEXES: &str = "indexes";
const INDEX_PREFIX: &str = "index.";
const RESULT_CAP: usize = 1000;

impl From<sled::Error> for DriverError {
    fn from(error: sled::Error) -> Self {
        DriverError(Box::new(error))
    }
}

#[derive(Debug)]
pub struct DocumentBackend {
    config: DatabaseConfig,
    db: Option<Db>,
}

impl DocumentBackend {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            config: config.clone(),
            db: None,
        }
    }

    fn db(&self) -> Result<&Db, BackendError> {
        self.db.as_ref().ok_or(BackendError::NotConnected)
    }
}

impl DatabaseBackend for DocumentBackend {
    fn connect(&mut self) -> Result<(), BackendError> {
        let temporary = self.config.get_bool("temporary").unwrap_or(false);
        let mut config = sled::Config::new().temporary(temporary);

        match self.config.get_str("path") {
            Some(path) => config = config.path(path),
            None if temporary => {}
            None => {
                return Err(BackendError::connection(DriverError::msg(
                    "the document backend requires parameter.path or parameter.temporary",
                )))
            }
        }

        let db = config.open().map_err(BackendError::connection)?;

        info!(
            path = ?self.config.get_str("path"),
            temporary = temporary,
            "Document store connected"
        );
        self.db = Some(db);

        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(db) = self.db.take() else {
            return;
        };

        match db.flush() {
            Ok(bytes) => info!(flushed = bytes, "Closed document store"),
            Err(error) => error!(error = ?error, "Failed to flush document store: {error}"),
        }
    }

    fn setup_schema(&mut self) -> Result<(), BackendError> {
        let db = self.db()?;

        // collections come back on first use, only bookkeeping has to go
        let stale = db
            .tree_names()
            .into_iter()
            .filter(|name| {
                let name = String::from_utf8_lossy(name);

                Table::ALL.iter().any(|table| table.as_str() == name)
                    || name == SEQUENCES
                    || name == INDEXES
                    || name.starts_with(INDEX_PREFIX)
            })
            .collect_vec();

        for name in stale {
            db.drop_tree(&name).map_err(BackendError::schema)?;
            debug!(tree = %String::from_utf8_lossy(&name), "Dropped tree");
        }

        for table in Table::ALL {
            db.open_tree(table.as_str()).map_err(BackendError::schema)?;
        }

        info!("Document collections ready");

        Ok(())
    }

    fn insert_batch(&mut self, rows: RowBatch<'_>) -> Result<Duration, BackendError> {
        let db = self.db()?;

        timed(|| insert_documents(db, rows)).map_err(BackendError::operation)
    }

    fn select_simple(&mut self, limit: usize) -> Result<Duration, BackendError> {
        let db = self.db()?;

        timed(|| -> Result<Vec<Value>, DriverError> {
            db.open_tree(Table::Customers.as_str())?
                .iter()
                .take(limit)
                .map(|entry| -> Result<Value, DriverError> {
                    let (_, document) = entry?;

                    Ok(serde_json::from_slice(&document)?)
                })
                .collect()
        })
        .map_err(BackendError::query)
    }

    fn complex_query(&self) -> ComplexQuery {
        ComplexQuery::Aggregation
    }

    fn select_with_aggregation(&mut self) -> Result<Duration, BackendError> {
        let db = self.db()?;

        timed(|| lookup_orders(db)).map_err(BackendError::query)
    }

    fn update_batch(&mut self, limit: usize) -> Result<Duration, BackendError> {
        let db = self.db()?;

        timed(|| -> Result<usize, DriverError> {
            let products = db.open_tree(Table::Products.as_str())?;
            let mut batch = Batch::default();
            let mut changes = Vec::new();
            let mut updated = 0;

            for entry in products.iter().take(limit) {
                let (key, document) = entry?;
                let mut document: Value = serde_json::from_slice(&document)?;
                let stock = document["stock"]
                    .as_i64()
                    .ok_or_else(|| DriverError::msg("product document without stock"))?;

                document["stock"] = json!(stock - 1);
                batch.insert(key.clone(), serde_json::to_vec(&document)?);
                changes.push((id_from_key(&key)?, json!(stock), json!(stock - 1)));
                updated += 1;
            }

            products.apply_batch(batch)?;
            reindex_field(db, Table::Products, "stock", &changes)?;

            Ok(updated)
        })
        .map_err(BackendError::operation)
    }

    fn delete_batch(&mut self, limit: usize) -> Result<Duration, BackendError> {
        let db = self.db()?;

        timed(|| -> Result<usize, DriverError> {
            let orders = db.open_tree(Table::Orders.as_str())?;
            let victims = orders
                .iter()
                .take(limit)
                .map(|entry| -> Result<(u64, Value), DriverError> {
                    let (key, document) = entry?;

                    Ok((id_from_key(&key)?, serde_json::from_slice(&document)?))
                })
                .collect::<Result<Vec<(u64, Value)>, DriverError>>()?;

            let mut batch = Batch::default();
            for (id, _) in &victims {
                batch.remove(id.to_be_bytes().to_vec());
            }
            orders.apply_batch(batch)?;
            unindex_documents(db, Table::Orders, &victims)?;

            Ok(victims.len())
        })
        .map_err(BackendError::operation)
    }

    fn create_index(&mut self, table: Table, column: &str) -> Result<(), BackendError> {
        table.check_column(column)?;
        let db = self.db()?;
        let registry = db.open_tree(INDEXES).map_err(BackendError::operation)?;
        let key = format!("{table}.{column}");

        let claimed = registry
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(&b""[..]))
            .map_err(BackendError::operation)?;

        if claimed.is_err() {
            return Err(BackendError::IndexExists {
                table,
                column: column.to_owned(),
            });
        }

        let build = || -> Result<usize, DriverError> {
            let index = db.open_tree(index_tree_name(table, column))?;
            let mut batch = Batch::default();
            let mut entries = 0;

            for entry in db.open_tree(table.as_str())?.iter() {
                let (key, document) = entry?;
                let document: Value = serde_json::from_slice(&document)?;
                batch.insert(
                    index_key(&document[column], id_from_key(&key)?)?,
                    &[] as &[u8],
                );
                entries += 1;
            }

            index.apply_batch(batch)?;

            Ok(entries)
        };

        match build() {
            Ok(entries) => {
                info!(index = %index_tree_name(table, column), entries = entries, "Created index");

                Ok(())
            }
            Err(error) => {
                // give the name back so a retry is not mistaken for a duplicate
                if let Err(cleanup) = registry.remove(key.as_bytes()) {
                    error!(error = ?cleanup, "Failed to unregister index {key}: {cleanup}");
                }

                Err(BackendError::Operation(error))
            }
        }
    }

    fn table_size(&mut self, table: Table) -> Result<u64, BackendError> {
        let db = self.db()?;

        db.open_tree(table.as_str())
            .map(|tree| tree.len() as u64)
            .map_err(BackendError::operation)
    }
}

fn index_tree_name(table: Table, field: &str) -> String {
    format!("{INDEX_PREFIX}{table}.{field}")
}

/// `{json value}\0{id}`, so all ids of one value share a prefix
fn index_key(value: &Value, id: u64) -> Result<Vec<u8>, DriverError> {
    let mut key = serde_json::to_vec(value)?;
    key.push(0);
    key.extend_from_slice(&id.to_be_bytes());

    Ok(key)
}

fn id_from_key(key: &[u8]) -> Result<u64, DriverError> {
    <[u8; 8]>::try_from(key)
        .map(u64::from_be_bytes)
        .map_err(|_| DriverError::msg("document key is not a 64 bit id"))
}

/// Fields of `table` that currently carry an index
fn indexed_fields(db: &Db, table: Table) -> Result<Vec<String>, DriverError> {
    let prefix = format!("{table}.");

    db.open_tree(INDEXES)?
        .scan_prefix(prefix.as_bytes())
        .map(|entry| -> Result<String, DriverError> {
            let (key, _) = entry?;

            Ok(String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
        })
        .collect()
}

/// Reserve `count` consecutive ids for `table`, returns the first one
fn reserve_ids(db: &Db, table: Table, count: u64) -> Result<u64, DriverError> {
    let last = db
        .open_tree(SEQUENCES)?
        .update_and_fetch(table.as_str(), |current| {
            let current = current
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);

            Some((current + count).to_be_bytes().to_vec())
        })?
        .and_then(|bytes| <[u8; 8]>::try_from(&bytes[..]).ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| DriverError::msg("sequence update returned nothing"))?;

    Ok(last + 1 - count)
}

fn documents(rows: RowBatch<'_>) -> Vec<Value> {
    let now = chrono::Utc::now().timestamp_micros();

    match rows {
        RowBatch::Customers(customers) => customers
            .iter()
            .map(|customer| {
                json!({
                    "name": customer.name,
                    "email": customer.email,
                    "city": customer.city,
                    "created_at": now,
                })
            })
            .collect(),
        RowBatch::Products(products) => products
            .iter()
            .map(|product| {
                json!({
                    "name": product.name,
                    "category": product.category,
                    "price": product.price,
                    "stock": product.stock,
                })
            })
            .collect(),
        RowBatch::Orders(orders) => orders
            .iter()
            .map(|order| {
                json!({
                    "customer_id": order.customer_ref,
                    "product_id": order.product_ref,
                    "quantity": order.quantity,
                    "total_amount": order.total_amount,
                    "order_date": now,
                })
            })
            .collect(),
    }
}

fn insert_documents(db: &Db, rows: RowBatch<'_>) -> Result<usize, DriverError> {
    let table = rows.table();
    let documents = documents(rows);

    if documents.is_empty() {
        return Ok(0);
    }

    let collection = db.open_tree(table.as_str())?;
    let first = reserve_ids(db, table, documents.len() as u64)?;
    let mut batch = Batch::default();

    for (id, document) in (first..).zip(&documents) {
        batch.insert(id.to_be_bytes().to_vec(), serde_json::to_vec(document)?);
    }
    collection.apply_batch(batch)?;

    for field in indexed_fields(db, table)? {
        let index = db.open_tree(index_tree_name(table, &field))?;
        let mut batch = Batch::default();

        for (id, document) in (first..).zip(&documents) {
            batch.insert(index_key(&document[field.as_str()], id)?, &[] as &[u8]);
        }
        index.apply_batch(batch)?;
    }

    Ok(documents.len())
}

fn unindex_documents(db: &Db, table: Table, removed: &[(u64, Value)]) -> Result<(), DriverError> {
    for field in indexed_fields(db, table)? {
        let index = db.open_tree(index_tree_name(table, &field))?;
        let mut batch = Batch::default();

        for (id, document) in removed {
            batch.remove(index_key(&document[field.as_str()], *id)?);
        }
        index.apply_batch(batch)?;
    }

    Ok(())
}

/// Move index entries of a single field from old to new values
fn reindex_field(
    db: &Db,
    table: Table,
    field: &str,
    changes: &[(u64, Value, Value)],
) -> Result<(), DriverError> {
    if !indexed_fields(db, table)?.iter().any(|name| name == field) {
        return Ok(());
    }

    let index = db.open_tree(index_tree_name(table, field))?;
    let mut batch = Batch::default();

    for (id, old, new) in changes {
        batch.remove(index_key(old, *id)?);
        batch.insert(index_key(new, *id)?, &[] as &[u8]);
    }

    Ok(index.apply_batch(batch)?)
}

fn lookup(collection: &Tree, reference: &Value) -> Result<Vec<Value>, DriverError> {
    let Some(id) = reference.as_u64() else {
        return Ok(Vec::new());
    };

    match collection.get(id.to_be_bytes())? {
        Some(document) => Ok(vec![serde_json::from_slice(&document)?]),
        None => Ok(Vec::new()),
    }
}

/// lookup customer, lookup product, match `total_amount > 100`, newest first,
/// capped at 1000 documents
fn lookup_orders(db: &Db) -> Result<Vec<Value>, DriverError> {
    let orders = db.open_tree(Table::Orders.as_str())?;
    let customers = db.open_tree(Table::Customers.as_str())?;
    let products = db.open_tree(Table::Products.as_str())?;
    let mut rows = Vec::new();

    for entry in orders.iter() {
        let (_, document) = entry?;
        let mut order: Value = serde_json::from_slice(&document)?;
        order["customer_info"] = Value::Array(lookup(&customers, &order["customer_id"])?);
        order["product_info"] = Value::Array(lookup(&products, &order["product_id"])?);

        if order["total_amount"].as_f64().unwrap_or_default() > 100.0 {
            rows.push(order);
        }
    }

    rows.sort_by_key(|order| Reverse(order["order_date"].as_i64().unwrap_or_default()));
    rows.truncate(RESULT_CAP);

    Ok(rows)
}

#[cfg(test)]
#[path = "document_test.rs"]
mod document_test;
