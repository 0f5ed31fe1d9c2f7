//! SQL shared by the relational backends. Limits are `usize` and table and
//! column names come from [`Table`], so formatting them into statements is safe.

use super::Table;

/// Orders with their customer and product, newest first
pub const JOIN_QUERY: &str = "select c.name, c.city, p.name as product, o.quantity,
       cast(o.total_amount as double) as total_amount
from orders o
join customers c on o.customer_id = c.customer_id
join products p on o.product_id = p.product_id
where o.total_amount > 100
order by o.order_date desc
limit 1000";

pub const INSERT_CUSTOMER: &str = "insert into customers (name, email, city) values (?, ?, ?)";
pub const INSERT_PRODUCT: &str =
    "insert into products (name, category, price, stock) values (?, ?, ?, ?)";
pub const INSERT_ORDER: &str =
    "insert into orders (customer_id, product_id, quantity, total_amount) values (?, ?, ?, ?)";

pub fn select_simple_query(limit: usize) -> String {
    format!("select customer_id, name, email, city from customers limit {limit}")
}

pub fn update_query(limit: usize) -> String {
    format!(
        "update products set stock = stock - 1
         where product_id in (select product_id from products limit {limit})"
    )
}

pub fn delete_query(limit: usize) -> String {
    format!(
        "delete from orders
         where order_id in (select order_id from orders limit {limit})"
    )
}

pub fn count_query(table: Table) -> String {
    format!("select count(*) from {table}")
}

pub fn index_name(table: Table, column: &str) -> String {
    format!("idx_{table}_{column}")
}

pub fn create_index_query(table: Table, column: &str) -> String {
    format!(
        "create index {} on {table} ({column})",
        index_name(table, column)
    )
}

/// Both SQLite and DuckDB report a duplicate index with this phrase
pub fn is_already_exists(message: &str) -> bool {
    message.contains("already exists")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn index_statements_use_table_and_column() {
        assert_eq!(index_name(Table::Customers, "city"), "idx_customers_city");
        assert_eq!(
            create_index_query(Table::Orders, "customer_id"),
            "create index idx_orders_customer_id on orders (customer_id)"
        );
    }

    #[test]
    pub fn limits_are_inlined() {
        assert!(select_simple_query(1000).ends_with("limit 1000"));
        assert!(update_query(500).contains("limit 500"));
        assert!(delete_query(100).contains("limit 100"));
        assert_eq!(count_query(Table::Products), "select count(*) from products");
    }

    #[test]
    pub fn duplicate_index_messages_are_recognized() {
        assert!(is_already_exists("index idx_customers_city already exists"));
        assert!(is_already_exists(
            "Catalog Error: Index with name \"idx_customers_city\" already exists!"
        ));
        assert!(!is_already_exists("no such table: customers"));
    }
}
