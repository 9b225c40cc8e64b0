use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::GlobalKeyExtractor,
    GovernorLayer,
};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::store::{NewProduct, OrderRow, ProductListing, ProductPatch, ProductStatus};

use super::auth::ensure_authorized;
use super::error::ApiError;
use super::responses::{
    HealthResponse, LoginRequest, LoginResponse, MessageResponse, OrdersQuery,
    ProductCreatedResponse, ProductSummary, UpdateOrderRequest,
};
use super::state::AppState;
use super::upload::ProductForm;

pub fn router(state: AppState) -> Router {
    let login_routes = Router::new().route("/login", post(login));
    let login_routes = match GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(10)
        .key_extractor(GlobalKeyExtractor)
        .finish()
    {
        Some(config) => login_routes.layer(GovernorLayer::new(Arc::new(config))),
        None => {
            warn!("login rate limiter misconfigured; running without it");
            login_routes
        }
    };

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/products",
            get(list_products)
                .post(add_product)
                .layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route("/api/product-list", get(product_list))
        .route(
            "/api/products/{id}",
            put(update_product).delete(delete_product),
        )
        .route("/update-order/{id}", put(update_order))
        .route("/orders", get(orders_by_status))
        .merge(login_routes)
        .layer(CorsLayer::permissive())
        // The last layer runs first, so the id exists before tracing and propagation.
        .layer(PropagateRequestIdLayer::new(request_id_header()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(
            request_id_header(),
            MakeRequestUuid::default(),
        ))
        .with_state(state)
}

fn request_id_header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::validation(rejection.body_text()))?;

    let issued = state
        .auth
        .issue_token(request.email.trim(), &request.password)
        .await
        .map_err(|error| {
            debug!(error = %error, "login rejected");
            ApiError::from(error)
        })?;
    info!(email = %request.email.trim(), "administrator logged in");

    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

async fn add_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Result<(StatusCode, Json<ProductCreatedResponse>), ApiError> {
    let admin = ensure_authorized(&state, &headers)?;
    let mut multipart =
        multipart.map_err(|rejection| ApiError::validation(rejection.body_text()))?;

    let submission = ProductForm::read(&mut multipart, &state.staging)
        .await?
        .validate()?;

    let image_url = state
        .images
        .upload(&submission.image)
        .await
        .map_err(|e| ApiError::internal("image upload failed", e))?;
    drop(submission.image);

    let product = NewProduct {
        name: submission.name,
        price: submission.price,
        section: submission.section,
        image_url,
        status: ProductStatus::Active,
        created_at: Utc::now(),
    };
    let id = state
        .store
        .insert_product(&product)
        .await
        .map_err(|e| ApiError::internal("failed to insert product", e))?;

    info!(
        product_id = id,
        admin = %admin.email,
        name = %product.name,
        section = %product.section,
        "product added"
    );
    Ok((
        StatusCode::CREATED,
        Json(ProductCreatedResponse {
            message: "Product added successfully",
            id,
            image_url: product.image_url,
        }),
    ))
}

async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductSummary>>, ApiError> {
    let products = state
        .store
        .list_products()
        .await
        .map_err(|e| ApiError::internal("failed to fetch products", e))?;
    debug!(products = products.len(), "products requested");
    Ok(Json(products.into_iter().map(ProductSummary::from).collect()))
}

async fn product_list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductListing>>, ApiError> {
    let products = state
        .store
        .list_products()
        .await
        .map_err(|e| ApiError::internal("failed to fetch product list", e))?;
    debug!(products = products.len(), "product list requested");
    Ok(Json(products))
}

async fn update_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<ProductPatch>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = ensure_authorized(&state, &headers)?;
    let Path(id) = id.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let Json(patch) = body.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let patch = patch.trimmed();

    if patch.is_empty() {
        return Err(ApiError::validation("No fields to update"));
    }
    let blank_text = [&patch.name, &patch.section, &patch.image_url]
        .into_iter()
        .flatten()
        .any(|value| value.is_empty());
    if blank_text {
        return Err(ApiError::validation("Fields must not be empty"));
    }

    let affected = state
        .store
        .update_product(id, &patch, Utc::now())
        .await
        .map_err(|e| ApiError::internal("failed to update product", e))?;
    if affected == 0 {
        debug!(product_id = id, "update for unknown product");
        return Err(ApiError::NotFound("product"));
    }

    info!(product_id = id, admin = %admin.email, "product updated");
    Ok(Json(MessageResponse {
        message: "Product updated successfully",
    }))
}

async fn delete_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = ensure_authorized(&state, &headers)?;
    let Path(id) = id.map_err(|rejection| ApiError::validation(rejection.body_text()))?;

    let affected = state
        .store
        .delete_product(id)
        .await
        .map_err(|e| ApiError::internal("failed to delete product", e))?;
    if affected == 0 {
        debug!(product_id = id, "delete for unknown product");
        return Err(ApiError::NotFound("product"));
    }

    info!(product_id = id, admin = %admin.email, "product deleted");
    Ok(Json(MessageResponse {
        message: "Product deleted successfully",
    }))
}

async fn update_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateOrderRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = ensure_authorized(&state, &headers)?;
    let Path(id) = id.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let Json(request) = body.map_err(|rejection| ApiError::validation(rejection.body_text()))?;

    let status = request
        .status
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("Missing status"))?;

    let affected = state
        .store
        .update_order_status(id, &status, Utc::now())
        .await
        .map_err(|e| ApiError::internal("failed to update order", e))?;
    if affected == 0 {
        debug!(order_id = id, "update for unknown order");
        return Err(ApiError::NotFound("order"));
    }

    info!(order_id = id, status = %status, admin = %admin.email, "order status updated");
    Ok(Json(MessageResponse {
        message: "Order updated successfully",
    }))
}

async fn orders_by_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<OrdersQuery>, QueryRejection>,
) -> Result<Json<Vec<OrderRow>>, ApiError> {
    ensure_authorized(&state, &headers)?;
    let Query(query) = query.map_err(|rejection| ApiError::validation(rejection.body_text()))?;

    let status = query
        .status
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Missing status"))?;

    let orders = state
        .store
        .orders_by_status(&status)
        .await
        .map_err(|e| ApiError::internal("failed to fetch orders", e))?;
    debug!(status = %status, orders = orders.len(), "orders requested");
    Ok(Json(orders))
}
