use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Administrator {
    pub email: String,
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Active => "ACTIVE",
            ProductStatus::Inactive => "INACTIVE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub price: Decimal,
    pub section: String,
    pub image_url: String,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
}

/// Product columns exposed by the public listing endpoints.
///
/// Rows written by earlier partial updates may hold NULL in any of these
/// columns; they are listed as `null` rather than failing the whole listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ProductListing {
    pub id: i64,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub section: Option<String>,
    pub image_url: Option<String>,
}

/// Partial product update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub section: Option<String>,
    pub image_url: Option<String>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.price.is_none()
            && self.section.is_none()
            && self.image_url.is_none()
    }

    /// Trims surrounding whitespace from the text fields.
    pub fn trimmed(self) -> Self {
        let trim = |value: Option<String>| value.map(|v| v.trim().to_string());
        Self {
            name: trim(self.name),
            price: self.price,
            section: trim(self.section),
            image_url: trim(self.image_url),
        }
    }
}

/// An order as stored. Columns other than `id`, `status` and `updated_at`
/// are owned by another system and passed through untyped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRow {
    pub id: i64,
    pub status: String,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{OrderRow, ProductListing, ProductPatch, ProductStatus};

    #[test]
    fn patch_is_empty_only_without_fields() {
        assert!(ProductPatch::default().is_empty());
        let patch = ProductPatch {
            price: Some(Decimal::new(1999, 2)),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn trimmed_patch_strips_text_but_keeps_absent_fields() {
        let patch = ProductPatch {
            name: Some(String::from("  Boot ")),
            image_url: Some(String::from("https://img.test/b.png\n")),
            ..Default::default()
        }
        .trimmed();

        assert_eq!(patch.name.as_deref(), Some("Boot"));
        assert_eq!(patch.image_url.as_deref(), Some("https://img.test/b.png"));
        assert_eq!(patch.section, None);
        assert_eq!(patch.price, None);
    }

    #[test]
    fn patch_parses_price_from_string_or_number() {
        let from_string: ProductPatch = serde_json::from_value(json!({ "price": "12.50" })).unwrap();
        assert_eq!(from_string.price, Some(Decimal::new(1250, 2)));

        let from_number: ProductPatch = serde_json::from_value(json!({ "price": 3 })).unwrap();
        assert_eq!(from_number.price, Some(Decimal::new(3, 0)));
    }

    #[test]
    fn status_serializes_in_upper_case() {
        assert_eq!(
            serde_json::to_value(ProductStatus::Active).unwrap(),
            json!("ACTIVE")
        );
        assert_eq!(ProductStatus::Inactive.as_str(), "INACTIVE");
    }

    #[test]
    fn order_row_flattens_opaque_columns() {
        let mut extra = serde_json::Map::new();
        extra.insert(String::from("customer"), json!("Ada"));
        let row = OrderRow {
            id: 7,
            status: String::from("SHIPPED"),
            updated_at: None,
            extra,
        };

        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["status"], json!("SHIPPED"));
        assert_eq!(value["customer"], json!("Ada"));
    }

    #[test]
    fn listing_with_null_columns_serializes_nulls() {
        let listing = ProductListing {
            id: 3,
            name: Some(String::from("Mug")),
            price: None,
            section: None,
            image_url: None,
        };

        assert_eq!(
            serde_json::to_value(&listing).unwrap(),
            json!({
                "id": 3,
                "name": "Mug",
                "price": null,
                "section": null,
                "image_url": null,
            })
        );
    }
}
