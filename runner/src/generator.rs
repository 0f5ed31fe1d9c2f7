use crate::config::ConfigErrors;
use rand::{rngs::StdRng, rngs::ThreadRng, seq::IndexedRandom, Rng, SeedableRng};
use tracing::info;

pub const CITIES: [&str; 10] = [
    "New York",
    "Los Angeles",
    "Chicago",
    "Houston",
    "Phoenix",
    "Philadelphia",
    "San Antonio",
    "San Diego",
    "Dallas",
    "San Jose",
];

pub const CATEGORIES: [&str; 10] = [
    "Electronics",
    "Clothing",
    "Books",
    "Home & Garden",
    "Sports",
    "Toys",
    "Food",
    "Health",
    "Beauty",
    "Automotive",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
}

/// An order as generated, referencing customers and products by their 1-based
/// position. References are drawn over the whole dataset and may point past
/// the rows a backend actually received.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub customer_ref: i64,
    pub product_ref: i64,
    pub quantity: i64,
    pub total_amount: f64,
}

/// One run's worth of synthetic records, shared read-only by every backend
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub orders: Vec<Order>,
}

#[derive(Debug)]
pub struct DataGenerator<R: Rng> {
    rng: R,
}

impl DataGenerator<ThreadRng> {
    pub fn new() -> Self {
        Self { rng: rand::rng() }
    }
}

impl Default for DataGenerator<ThreadRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl DataGenerator<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> DataGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Generate `size` customers, `size / 2` products and `size * 2` orders
    pub fn generate(&mut self, size: usize) -> Result<SyntheticDataset, ConfigErrors> {
        if size == 0 {
            return Err(ConfigErrors::InvalidConfiguration(
                "dataset size must be a positive number of records".to_owned(),
            ));
        }

        info!(size = size, "Generating test records");

        let customers = (0..size)
            .map(|i| Customer {
                name: format!("Customer_{i}"),
                email: format!("customer{i}@email.com"),
                city: self.pick(&CITIES),
            })
            .collect();

        let products = (0..size / 2)
            .map(|i| Product {
                name: format!("Product_{i}"),
                category: self.pick(&CATEGORIES),
                price: round_cents(self.rng.random_range(10.0..=500.0)),
                stock: self.rng.random_range(0..=1000),
            })
            .collect();

        // a single customer leaves no products to point at, keep the range non-empty
        let product_range = (size / 2).max(1) as i64;
        let orders = (0..size * 2)
            .map(|_| Order {
                customer_ref: self.rng.random_range(1..=size as i64),
                product_ref: self.rng.random_range(1..=product_range),
                quantity: self.rng.random_range(1..=10),
                total_amount: round_cents(self.rng.random_range(50.0..=1000.0)),
            })
            .collect();

        Ok(SyntheticDataset {
            customers,
            products,
            orders,
        })
    }

    fn pick(&mut self, values: &[&str]) -> String {
        values
            .choose(&mut self.rng)
            .copied()
            .unwrap_or_default()
            .to_owned()
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
#[path = "generator_test.rs"]
mod generator_test;
