//! In-memory `Store` used by tests.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Map;

use super::models::{Administrator, NewProduct, OrderRow, ProductListing, ProductPatch};
use super::{Store, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredProduct {
    pub id: i64,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub section: Option<String>,
    pub image_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    admins: Vec<Administrator>,
    products: Vec<StoredProduct>,
    orders: Vec<OrderRow>,
    next_product_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn add_admin(&self, email: &str, password_hash: &str) {
        self.tables.lock().unwrap().admins.push(Administrator {
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        });
    }

    pub fn add_order(&self, id: i64, status: &str) {
        self.tables.lock().unwrap().orders.push(OrderRow {
            id,
            status: status.to_string(),
            updated_at: None,
            extra: Map::new(),
        });
    }

    /// Inserts a row as-is, including NULL columns left by older writers.
    pub fn add_product_row(&self, product: StoredProduct) {
        let mut tables = self.tables.lock().unwrap();
        tables.next_product_id = tables.next_product_id.max(product.id);
        tables.products.push(product);
    }

    pub fn products(&self) -> Vec<StoredProduct> {
        self.tables.lock().unwrap().products.clone()
    }

    pub fn orders(&self) -> Vec<OrderRow> {
        self.tables.lock().unwrap().orders.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_admin(&self, email: &str) -> Result<Option<Administrator>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.admins.iter().find(|a| a.email == email).cloned())
    }

    async fn insert_admin(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.tables.lock().unwrap().admins.push(Administrator {
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at,
        });
        Ok(())
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<i64, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        tables.next_product_id += 1;
        let id = tables.next_product_id;
        tables.products.push(StoredProduct {
            id,
            name: Some(product.name.clone()),
            price: Some(product.price),
            section: Some(product.section.clone()),
            image_url: Some(product.image_url.clone()),
            status: product.status.as_str().to_string(),
            created_at: product.created_at,
            updated_at: product.created_at,
        });
        Ok(id)
    }

    async fn list_products(&self) -> Result<Vec<ProductListing>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .products
            .iter()
            .map(|p| ProductListing {
                id: p.id,
                name: p.name.clone(),
                price: p.price,
                section: p.section.clone(),
                image_url: p.image_url.clone(),
            })
            .collect())
    }

    async fn update_product(
        &self,
        id: i64,
        patch: &ProductPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let Some(product) = tables.products.iter_mut().find(|p| p.id == id) else {
            return Ok(0);
        };
        if patch.name.is_some() {
            product.name.clone_from(&patch.name);
        }
        if patch.price.is_some() {
            product.price = patch.price;
        }
        if patch.section.is_some() {
            product.section.clone_from(&patch.section);
        }
        if patch.image_url.is_some() {
            product.image_url.clone_from(&patch.image_url);
        }
        product.updated_at = updated_at;
        Ok(1)
    }

    async fn delete_product(&self, id: i64) -> Result<u64, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let before = tables.products.len();
        tables.products.retain(|p| p.id != id);
        Ok((before - tables.products.len()) as u64)
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let Some(order) = tables.orders.iter_mut().find(|o| o.id == id) else {
            return Ok(0);
        };
        order.status = status.to_string();
        order.updated_at = Some(updated_at);
        Ok(1)
    }

    async fn orders_by_status(&self, status: &str) -> Result<Vec<OrderRow>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .orders
            .iter()
            .filter(|o| o.status == status)
            .cloned()
            .collect())
    }
}
