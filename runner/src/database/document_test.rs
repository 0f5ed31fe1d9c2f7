use super::*;
use crate::generator::{DataGenerator, SyntheticDataset};

fn connected() -> DocumentBackend {
    let mut backend =
        DocumentBackend::new(&DatabaseConfig::new("document").with_parameter("temporary", true));
    backend.connect().unwrap();
    backend.setup_schema().unwrap();
    backend
}

fn loaded(size: usize) -> (DocumentBackend, SyntheticDataset) {
    let dataset = DataGenerator::seeded(5).generate(size).unwrap();
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

    (backend, dataset)
}

fn index_len(backend: &DocumentBackend, table: Table, field: &str) -> usize {
    backend
        .db()
        .unwrap()
        .open_tree(index_tree_name(table, field))
        .unwrap()
        .len()
}

fn stock_sum(backend: &DocumentBackend) -> i64 {
    backend
        .db()
        .unwrap()
        .open_tree(Table::Products.as_str())
        .unwrap()
        .iter()
        .map(|entry| {
            let (_, document) = entry.unwrap();
            let document: Value = serde_json::from_slice(&document).unwrap();
            document["stock"].as_i64().unwrap()
        })
        .sum()
}

#[test]
pub fn connect_needs_path_or_temporary() {
    let mut backend = DocumentBackend::new(&DatabaseConfig::new("document"));

    assert!(matches!(backend.connect(), Err(BackendError::Connection(_))));
    assert!(matches!(
        backend.table_size(Table::Orders),
        Err(BackendError::NotConnected)
    ));
    backend.disconnect();
}

#[test]
pub fn connect_to_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");
    let mut backend = DocumentBackend::new(
        &DatabaseConfig::new("document").with_parameter("path", path.to_string_lossy().into_owned()),
    );

    backend.connect().unwrap();
    backend.setup_schema().unwrap();
    assert_eq!(backend.table_size(Table::Customers).unwrap(), 0);
    backend.disconnect();
}

#[test]
pub fn crud_changes_collections() {
    let (mut backend, _) = loaded(100);

    assert_eq!(backend.table_size(Table::Customers).unwrap(), 100);
    assert_eq!(backend.table_size(Table::Products).unwrap(), 50);
    assert_eq!(backend.table_size(Table::Orders).unwrap(), 200);

    backend.select_simple(1000).unwrap();
    assert_eq!(backend.complex_query(), ComplexQuery::Aggregation);
    backend.select_with_aggregation().unwrap();
    assert!(matches!(
        backend.select_with_join(),
        Err(BackendError::Unsupported(_))
    ));

    let before = stock_sum(&backend);
    backend.update_batch(500).unwrap();
    assert_eq!(before - stock_sum(&backend), 50);

    backend.delete_batch(100).unwrap();
    assert_eq!(backend.table_size(Table::Orders).unwrap(), 100);
    backend.disconnect();
}

#[test]
pub fn ids_continue_across_batches() {
    let dataset = DataGenerator::seeded(1).generate(10).unwrap();
    let mut backend = connected();

    backend
        .insert_batch(RowBatch::Customers(&dataset.customers[..4]))
        .unwrap();
    backend
        .insert_batch(RowBatch::Customers(&dataset.customers[4..]))
        .unwrap();

    let db = backend.db().unwrap();
    let ids = db
        .open_tree(Table::Customers.as_str())
        .unwrap()
        .iter()
        .keys()
        .map(|key| id_from_key(&key.unwrap()).unwrap())
        .collect_vec();
    assert_eq!(ids, (1..=10).collect_vec());
}

#[test]
pub fn lookup_resolves_references() {
    let (backend, _) = loaded(60);
    let rows = lookup_orders(backend.db().unwrap()).unwrap();

    assert!(rows.len() <= RESULT_CAP);
    for row in &rows {
        assert!(row["total_amount"].as_f64().unwrap() > 100.0);
        assert_eq!(row["customer_info"].as_array().unwrap().len(), 1);
        assert_eq!(row["product_info"].as_array().unwrap().len(), 1);
    }
    assert!(rows
        .windows(2)
        .all(|pair| pair[0]["order_date"].as_i64() >= pair[1]["order_date"].as_i64()));
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
        backend.create_index(Table::Customers, "shoe_size"),
        Err(BackendError::Operation(_))
    ));
}

#[test]
pub fn indexes_follow_inserts_and_deletes() {
    let (mut backend, dataset) = loaded(80);

    backend.create_index(Table::Orders, "customer_id").unwrap();
    backend.create_index(Table::Products, "stock").unwrap();
    assert_eq!(index_len(&backend, Table::Orders, "customer_id"), 160);

    backend
        .insert_batch(RowBatch::Orders(&dataset.orders[..10]))
        .unwrap();
    assert_eq!(index_len(&backend, Table::Orders, "customer_id"), 170);

    backend.delete_batch(100).unwrap();
    assert_eq!(index_len(&backend, Table::Orders, "customer_id"), 70);

    backend.update_batch(500).unwrap();
    assert_eq!(index_len(&backend, Table::Products, "stock"), 40);
    let db = backend.db().unwrap();
    let products = db.open_tree(Table::Products.as_str()).unwrap();
    let index = db
        .open_tree(index_tree_name(Table::Products, "stock"))
        .unwrap();
    for entry in products.iter() {
        let (key, document) = entry.unwrap();
        let document: Value = serde_json::from_slice(&document).unwrap();
        let id = id_from_key(&key).unwrap();
        assert!(index
            .contains_key(index_key(&document["stock"], id).unwrap())
            .unwrap());
    }
}

#[test]
pub fn schema_setup_resets_everything() {
    let (mut backend, dataset) = loaded(20);

    backend.create_index(Table::Customers, "city").unwrap();
    backend.setup_schema().unwrap();

    for table in Table::ALL {
        assert_eq!(backend.table_size(table).unwrap(), 0);
    }
    assert_eq!(index_len(&backend, Table::Customers, "city"), 0);

    // sequences start over and the index can be created again
    backend
        .insert_batch(RowBatch::Customers(&dataset.customers[..1]))
        .unwrap();
    let first = backend
        .db()
        .unwrap()
        .open_tree(Table::Customers.as_str())
        .unwrap()
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(id_from_key(&first.0).unwrap(), 1);
    backend.create_index(Table::Customers, "city").unwrap();
}
