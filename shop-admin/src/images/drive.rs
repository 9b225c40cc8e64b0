//! Google Drive image host.
//!
//! Authenticates as a service account using the OAuth2 JWT-bearer grant, then
//! uploads through a resumable session (metadata first, bytes streamed from
//! the staged file) and grants `anyone:reader` so the returned
//! `https://drive.google.com/uc?id=<id>` URL is publicly retrievable.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::{ImageHost, StagedImage, UploadError};

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const PUBLIC_URL_PREFIX: &str = "https://drive.google.com/uc?id=";
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("invalid service account JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("service account private key is not a valid RSA PEM: {0}")]
    PrivateKey(#[from] jsonwebtoken::errors::Error),
}

#[derive(Deserialize)]
struct RawServiceAccountKey {
    client_email: String,
    private_key: String,
    private_key_id: Option<String>,
    token_uri: Option<String>,
}

/// Service-account credentials, parsed from the JSON key material itself
/// rather than from a path on disk.
pub struct ServiceAccountKey {
    client_email: String,
    private_key: SecretString,
    private_key_id: Option<String>,
    token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, CredentialsError> {
        let parsed: RawServiceAccountKey = serde_json::from_str(raw)?;
        Ok(Self {
            client_email: parsed.client_email,
            private_key: SecretString::from(parsed.private_key),
            private_key_id: parsed.private_key_id,
            token_uri: parsed
                .token_uri
                .unwrap_or_else(|| String::from(DEFAULT_TOKEN_URI)),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    id: Option<String>,
}

/// Uploads product images into a fixed Drive folder.
pub struct DriveClient {
    http: Client,
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    signing_key: EncodingKey,
    folder_id: String,
}

impl fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveClient")
            .field("client_email", &self.client_email)
            .field("folder_id", &self.folder_id)
            .finish_non_exhaustive()
    }
}

impl DriveClient {
    pub fn new(key: ServiceAccountKey, folder_id: String) -> Result<Self, CredentialsError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.expose_secret().as_bytes())?;
        info!(
            client_email = %key.client_email,
            folder_id = %folder_id,
            "drive image host initialized"
        );
        Ok(Self {
            http: http_client(),
            client_email: key.client_email,
            key_id: key.private_key_id,
            token_uri: key.token_uri,
            signing_key,
            folder_id,
        })
    }

    async fn access_token(&self) -> Result<String, UploadError> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECONDS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        let assertion = jsonwebtoken::encode(&header, &claims, &self.signing_key)?;

        let resp = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = ensure_success(resp, "token exchange").await?.json().await?;
        Ok(token.access_token)
    }

    /// Opens a resumable upload session and returns its session URI.
    async fn start_session(&self, token: &str, image: &StagedImage) -> Result<String, UploadError> {
        let metadata = json!({
            "name": image.filename(),
            "parents": [self.folder_id],
        });
        let resp = self
            .http
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", image.mime_type())
            .header("X-Upload-Content-Length", image.len())
            .json(&metadata)
            .send()
            .await?;
        let resp = ensure_success(resp, "start upload session").await?;

        resp.headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(UploadError::MissingField("upload session location"))
    }

    async fn send_bytes(&self, session_uri: &str, image: &StagedImage) -> Result<String, UploadError> {
        let file = image.open().await?;
        let resp = self
            .http
            .put(session_uri)
            .header(CONTENT_TYPE, image.mime_type())
            .header(CONTENT_LENGTH, image.len())
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let created: FileResponse = ensure_success(resp, "upload bytes").await?.json().await?;
        created.id.ok_or(UploadError::MissingField("file id"))
    }

    async fn make_public(&self, token: &str, file_id: &str) -> Result<(), UploadError> {
        let resp = self
            .http
            .post(format!("{FILES_URL}/{file_id}/permissions"))
            .bearer_auth(token)
            .json(&json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await?;
        ensure_success(resp, "grant public access").await?;
        Ok(())
    }

    /// Best-effort delete of a file that could not be made public.
    async fn discard(&self, token: &str, file_id: &str) {
        let result = self
            .http
            .delete(format!("{FILES_URL}/{file_id}"))
            .bearer_auth(token)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(file_id = %file_id, "discarded unpublished drive file");
            }
            Ok(resp) => {
                warn!(file_id = %file_id, status = %resp.status(), "failed to discard drive file");
            }
            Err(error) => {
                warn!(file_id = %file_id, error = %error, "failed to discard drive file");
            }
        }
    }
}

#[async_trait]
impl ImageHost for DriveClient {
    async fn upload(&self, image: &StagedImage) -> Result<String, UploadError> {
        let token = self.access_token().await?;
        let session_uri = self.start_session(&token, image).await?;
        let file_id = self.send_bytes(&session_uri, image).await?;

        if let Err(error) = self.make_public(&token, &file_id).await {
            self.discard(&token, &file_id).await;
            return Err(error);
        }

        info!(
            file_id = %file_id,
            filename = %image.filename(),
            bytes = image.len(),
            "image uploaded to drive"
        );
        Ok(public_url(&file_id))
    }
}

fn public_url(file_id: &str) -> String {
    format!("{PUBLIC_URL_PREFIX}{file_id}")
}

fn http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("shop-admin/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

async fn ensure_success(resp: Response, step: &'static str) -> Result<Response, UploadError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let mut message = resp.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    warn!(step, status = %status, "drive request failed");
    Err(UploadError::Provider { status, message })
}
