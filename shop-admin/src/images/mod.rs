//! Product image hosting.
//!
//! Incoming images are streamed into a [`StagedImage`] (a temporary file that
//! is removed when dropped) and then handed to an [`ImageHost`], which stores
//! the file with the remote provider and returns a public URL.
//!
//! Uploads are not idempotent: every call creates a new remote object.

mod drive;
mod staging;

use async_trait::async_trait;
use thiserror::Error;

pub use drive::{DriveClient, ServiceAccountKey};
pub use staging::{StagedImage, StagingArea};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to sign service account assertion: {0}")]
    Assertion(#[from] jsonwebtoken::errors::Error),
    #[error("image host returned {status}: {message}")]
    Provider {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("image host response missing {0}")]
    MissingField(&'static str),
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Stores `image` publicly and returns a URL that dereferences to it.
    async fn upload(&self, image: &StagedImage) -> Result<String, UploadError>;
}
