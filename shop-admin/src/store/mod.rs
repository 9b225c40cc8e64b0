//! Relational store access for administrators, products and orders.
//!
//! Every statement the service issues goes through the [`Store`] trait. The
//! production implementation is [`MySqlStore`]; the HTTP layer only ever sees
//! `Arc<dyn Store>` so handlers can be exercised against an in-memory store.
//!
//! Mutations report the number of affected rows so callers can tell "updated"
//! apart from "no such row".

#[cfg(test)]
pub mod memory;
mod models;
mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use models::{Administrator, NewProduct, OrderRow, ProductListing, ProductPatch, ProductStatus};
pub use mysql::MySqlStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid row data: {0}")]
    DataCorruption(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Exact-match lookup by email.
    async fn find_admin(&self, email: &str) -> Result<Option<Administrator>, StoreError>;

    async fn insert_admin(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Inserts a product and returns its generated id.
    async fn insert_product(&self, product: &NewProduct) -> Result<i64, StoreError>;

    async fn list_products(&self) -> Result<Vec<ProductListing>, StoreError>;

    /// Writes only the fields present in `patch`. Returns affected rows.
    async fn update_product(
        &self,
        id: i64,
        patch: &ProductPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Returns affected rows.
    async fn delete_product(&self, id: i64) -> Result<u64, StoreError>;

    /// Returns affected rows.
    async fn update_order_status(
        &self,
        id: i64,
        status: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn orders_by_status(&self, status: &str) -> Result<Vec<OrderRow>, StoreError>;
}
