//! # shop-admin
//!
//! Administrative backend for a small shop: admin login, product catalog
//! management and order-status updates over HTTP.
//!
//! ## Architecture
//!
//! - **Store**: MySQL tables for administrators, products and orders behind a `Store` trait
//! - **Images**: product images are staged to a temp file and pushed to Google Drive
//! - **Auth**: Argon2id password hashes, 24h HS256 bearer tokens
//! - **HTTP**: Axum router with request IDs, CORS, login rate limiting and graceful shutdown

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

mod auth;
mod config;
mod http;
mod images;
mod store;

use std::sync::Arc;

use anyhow::{bail, Context};
use axum::serve;
use chrono::Utc;
use clap::Parser;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::{hash_password, Authenticator, TokenSigner};
use crate::config::{read_file_config, Cli, Command, DatabaseArgs, DatabaseConfig, FileConfig, ServeArgs, ServeConfig};
use crate::http::{router, AppState};
use crate::images::{DriveClient, ServiceAccountKey, StagingArea};
use crate::store::{MySqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_logging().context("failed to initialize logging")?;

    let cli = Cli::parse();
    let file = read_file_config(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Some(Command::Serve(args)) => run_server(args, cli.database, &file).await,
        Some(Command::CreateAdmin { email }) => create_admin(&email, cli.database, &file).await,
        None => run_server(cli.serve, cli.database, &file).await,
    }
}

/// Initialize tracing subscriber with `RUST_LOG` env filter (default: `info`).
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

async fn run_server(args: ServeArgs, database: DatabaseArgs, file: &FileConfig) -> anyhow::Result<()> {
    let config = ServeConfig::resolve(args, database, file, |key| std::env::var(key).ok())
        .context("failed to load configuration")?;
    info!(
        bind = %config.bind,
        mysql_host = %config.database.host,
        mysql_port = config.database.port,
        mysql_db = %config.database.database,
        drive_folder_id = %config.drive_folder_id,
        max_upload_bytes = config.max_upload_bytes,
        "configuration loaded"
    );

    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .with_context(|| format!("failed to create staging dir {}", config.staging_dir.display()))?;

    let store = connect_store(&config.database).await?;

    let key = ServiceAccountKey::from_json(config.drive_credentials.expose_secret())
        .context("failed to parse service account credentials")?;
    let drive = DriveClient::new(key, config.drive_folder_id.clone())
        .context("failed to initialize drive client")?;

    let signer = TokenSigner::new(&config.jwt_secret);
    let state = AppState {
        store: Arc::clone(&store),
        auth: Arc::new(Authenticator::new(store, signer)),
        images: Arc::new(drive),
        staging: StagingArea::new(config.staging_dir),
        max_upload_bytes: config.max_upload_bytes,
    };
    info!(staging_dir = %state.staging.dir().display(), "upload staging ready");

    let app = router(state);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    let shutdown = tokio::signal::ctrl_c();
    info!(bind = %config.bind, "shop-admin listening");

    serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
            info!("shutting down gracefully");
        })
        .await
        .context("server exited with error")
}

/// Inserts an administrator. The password is the first line of stdin.
async fn create_admin(email: &str, database: DatabaseArgs, file: &FileConfig) -> anyhow::Result<()> {
    let email = email.trim();
    if email.is_empty() {
        bail!("administrator email must not be empty");
    }

    let database = DatabaseConfig::resolve(database, file).context("failed to load configuration")?;

    info!(email = %email, "reading administrator password from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let password = lines
        .next_line()
        .await
        .context("failed to read password from stdin")?
        .map(|line| line.trim().to_string())
        .unwrap_or_default();
    if password.is_empty() {
        bail!("administrator password must not be empty");
    }

    let password_hash = hash_password(&password).context("failed to hash password")?;
    let store = connect_store(&database).await?;
    store
        .insert_admin(email, &password_hash, Utc::now())
        .await
        .with_context(|| format!("failed to create administrator {email}"))?;

    info!(email = %email, "administrator created");
    Ok(())
}

async fn connect_store(database: &DatabaseConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store = MySqlStore::connect(database.connect_options(), database.max_connections)
        .await
        .with_context(|| {
            format!(
                "failed to connect to MySQL at {}:{}/{}",
                database.host, database.port, database.database
            )
        })?;
    Ok(Arc::new(store))
}
