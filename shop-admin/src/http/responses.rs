use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::store::ProductListing;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProductCreatedResponse {
    pub message: &'static str,
    pub id: i64,
    pub image_url: String,
}

/// Row shape of `GET /api/products`.
#[derive(Debug, Serialize)]
pub struct ProductSummary {
    pub id: i64,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub image_url: Option<String>,
}

impl From<ProductListing> for ProductSummary {
    fn from(listing: ProductListing) -> Self {
        Self {
            id: listing.id,
            name: listing.name,
            price: listing.price,
            image_url: listing.image_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
}
