//! Multipart parsing for the add-product form.
//!
//! The image part is streamed straight into the staging area; text parts are
//! buffered. Nothing is validated until the whole body has been read, and
//! nothing is uploaded or written until validation passes.

use std::str::FromStr;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use tracing::debug;

use crate::images::{StagedImage, StagingArea};

use super::error::ApiError;

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Default)]
pub struct ProductForm {
    name: Option<String>,
    price: Option<String>,
    section: Option<String>,
    image: Option<StagedImage>,
}

/// A validated add-product submission.
#[derive(Debug)]
pub struct ProductSubmission {
    pub name: String,
    pub price: Decimal,
    pub section: String,
    pub image: StagedImage,
}

impl ProductForm {
    pub async fn read(multipart: &mut Multipart, staging: &StagingArea) -> Result<Self, ApiError> {
        let mut form = ProductForm::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                IMAGE_FIELD => form.image = Some(stage_image(field, staging).await?),
                "name" => form.name = Some(field.text().await.map_err(multipart_error)?),
                "price" => form.price = Some(field.text().await.map_err(multipart_error)?),
                "section" => form.section = Some(field.text().await.map_err(multipart_error)?),
                other => debug!(field = %other, "ignoring unknown form field"),
            }
        }

        Ok(form)
    }

    pub fn validate(self) -> Result<ProductSubmission, ApiError> {
        let image = self
            .image
            .filter(|image| !image.is_empty())
            .ok_or_else(|| ApiError::validation("No image provided"))?;

        let (Some(name), Some(price), Some(section)) = (
            non_blank(self.name),
            non_blank(self.price),
            non_blank(self.section),
        ) else {
            return Err(ApiError::validation("Missing required fields"));
        };

        let price = Decimal::from_str(&price).map_err(|_| ApiError::validation("Invalid price"))?;

        Ok(ProductSubmission {
            name,
            price,
            section,
            image,
        })
    }
}

async fn stage_image(mut field: Field<'_>, staging: &StagingArea) -> Result<StagedImage, ApiError> {
    let mut stager = staging
        .begin(field.file_name(), field.content_type())
        .map_err(|e| ApiError::internal("failed to stage upload", e))?;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        stager
            .write_chunk(&chunk)
            .await
            .map_err(|e| ApiError::internal("failed to stage upload", e))?;
    }

    stager
        .finish()
        .await
        .map_err(|e| ApiError::internal("failed to stage upload", e))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn multipart_error(error: MultipartError) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation(error.body_text())
    }
}
