use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::models::{Administrator, NewProduct, OrderRow, ProductListing, ProductPatch};
use super::{Store, StoreError};

/// `Store` backed by a MySQL connection pool.
///
/// sqlx negotiates `CLIENT_FOUND_ROWS`, so `rows_affected` counts matched
/// rows even when an UPDATE leaves the values unchanged.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(
        options: MySqlConnectOptions,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        info!(max_connections, "database pool ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn find_admin(&self, email: &str) -> Result<Option<Administrator>, StoreError> {
        let admin = sqlx::query_as::<_, Administrator>(
            "SELECT email, password, created_at FROM admins WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(admin)
    }

    async fn insert_admin(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO admins (email, password, created_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(password_hash)
            .bind(created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO products (name, price, section, image_url, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.name)
        .bind(product.price)
        .bind(&product.section)
        .bind(&product.image_url)
        .bind(product.status.as_str())
        .bind(product.created_at)
        .bind(product.created_at)
        .execute(&self.pool)
        .await?;

        i64::try_from(result.last_insert_id())
            .map_err(|_| StoreError::DataCorruption(String::from("product id out of range")))
    }

    async fn list_products(&self) -> Result<Vec<ProductListing>, StoreError> {
        let rows = sqlx::query_as::<_, ProductListing>(
            "SELECT id, name, price, section, image_url FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_product(
        &self,
        id: i64,
        patch: &ProductPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = COALESCE(?, name),
                price = COALESCE(?, price),
                section = COALESCE(?, section),
                image_url = COALESCE(?, image_url),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(patch.name.as_deref())
        .bind(patch.price)
        .bind(patch.section.as_deref())
        .bind(patch.image_url.as_deref())
        .bind(updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_product(&self, id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn orders_by_status(&self, status: &str) -> Result<Vec<OrderRow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM orders WHERE status = ? ORDER BY id")
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        debug!(status = %status, rows = rows.len(), "orders fetched");
        rows.iter().map(order_from_row).collect()
    }
}

fn order_from_row(row: &MySqlRow) -> Result<OrderRow, StoreError> {
    let mut order = OrderRow {
        id: row.try_get("id")?,
        status: row.try_get("status")?,
        updated_at: row.try_get("updated_at")?,
        extra: Map::new(),
    };

    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name();
        if matches!(name, "id" | "status" | "updated_at") {
            continue;
        }
        let value = column_to_json(row, index, column.type_info().name())?;
        order.extra.insert(name.to_string(), value);
    }

    Ok(order)
}

/// Decodes a column of unknown meaning into the closest JSON value.
fn column_to_json(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value, StoreError> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::from(row.try_get::<i64, _>(index)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => Value::from(row.try_get::<u64, _>(index)?),
        "FLOAT" | "DOUBLE" => Value::from(row.try_get::<f64, _>(index)?),
        "DECIMAL" => Value::String(row.try_get::<Decimal, _>(index)?.to_string()),
        "DATETIME" | "TIMESTAMP" => serde_json::to_value(row.try_get::<NaiveDateTime, _>(index)?)
            .map_err(|e| StoreError::DataCorruption(e.to_string()))?,
        "DATE" => serde_json::to_value(row.try_get::<NaiveDate, _>(index)?)
            .map_err(|e| StoreError::DataCorruption(e.to_string()))?,
        "JSON" => {
            let raw = row.try_get::<String, _>(index)?;
            serde_json::from_str(&raw).map_err(|e| StoreError::DataCorruption(e.to_string()))?
        }
        _ => match row.try_get::<String, _>(index) {
            Ok(text) => Value::String(text),
            Err(_) => {
                debug!(column = index, type_name, "column not representable as JSON");
                Value::Null
            }
        },
    };

    Ok(value)
}
