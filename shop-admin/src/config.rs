use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::mysql::MySqlConnectOptions;
use thiserror::Error;

const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const JWT_SECRET_ENV: &str = "JWT_SECRET_KEY";
const DRIVE_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS_JSON";

#[derive(Debug, Parser)]
#[command(
    name = "shop-admin",
    version,
    about = "Administrative backend for the shop catalog and orders"
)]
pub struct Cli {
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Serve options used when no subcommand is given.
    #[command(flatten)]
    pub serve: ServeArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API (default).
    Serve(ServeArgs),
    /// Provision an administrator; the password is read from stdin.
    CreateAdmin {
        #[arg(long, value_name = "EMAIL")]
        email: String,
    },
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    #[arg(long, env = "SHOP_ADMIN_BIND", value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    #[arg(long, env = "DRIVE_FOLDER_ID", value_name = "ID")]
    pub drive_folder_id: Option<String>,

    #[arg(long, value_name = "DIR")]
    pub staging_dir: Option<PathBuf>,

    #[arg(long, value_name = "BYTES")]
    pub max_upload_bytes: Option<usize>,
}

#[derive(Debug, Default, Args)]
pub struct DatabaseArgs {
    #[arg(long = "mysql-host", env = "MYSQL_HOST", global = true)]
    pub host: Option<String>,

    #[arg(long = "mysql-user", env = "MYSQL_USER", global = true)]
    pub user: Option<String>,

    #[arg(
        long = "mysql-password",
        env = "MYSQL_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub password: Option<String>,

    #[arg(long = "mysql-db", env = "MYSQL_DB", global = true)]
    pub database: Option<String>,

    #[arg(long = "mysql-port", env = "MYSQL_PORT", global = true)]
    pub port: Option<u16>,

    #[arg(long, global = true)]
    pub max_connections: Option<u32>,
}

#[derive(Debug)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: SecretString,
    pub database: String,
    pub port: u16,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose_secret())
            .database(&self.database)
    }
}

#[derive(Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub database: DatabaseConfig,
    pub jwt_secret: SecretString,
    pub drive_credentials: SecretString,
    pub drive_folder_id: String,
    pub staging_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("missing required setting {key}")]
    Missing { key: &'static str },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    bind: Option<SocketAddr>,
    drive_folder_id: Option<String>,
    staging_dir: Option<PathBuf>,
    max_upload_bytes: Option<usize>,
    #[serde(default)]
    database: FileDatabaseConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileDatabaseConfig {
    host: Option<String>,
    user: Option<String>,
    password: Option<String>,
    #[serde(alias = "name")]
    database: Option<String>,
    port: Option<u16>,
    max_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn resolve(args: DatabaseArgs, file: &FileConfig) -> Result<Self, ConfigError> {
        let from_file = &file.database;

        let host = args
            .host
            .or_else(|| from_file.host.clone())
            .unwrap_or_else(|| String::from("127.0.0.1"));
        let user = args
            .user
            .or_else(|| from_file.user.clone())
            .ok_or(ConfigError::Missing { key: "MYSQL_USER" })?;
        let password = args
            .password
            .or_else(|| from_file.password.clone())
            .unwrap_or_default();
        let database = args
            .database
            .or_else(|| from_file.database.clone())
            .ok_or(ConfigError::Missing { key: "MYSQL_DB" })?;
        let port = args.port.or(from_file.port).unwrap_or(DEFAULT_MYSQL_PORT);
        let max_connections = args
            .max_connections
            .or(from_file.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        Ok(Self {
            host,
            user,
            password: SecretString::from(password),
            database,
            port,
            max_connections,
        })
    }
}

impl ServeConfig {
    /// Merges CLI/env arguments over the config file over defaults. Secrets
    /// are read from `env` only.
    pub fn resolve(
        args: ServeArgs,
        database: DatabaseArgs,
        file: &FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let database = DatabaseConfig::resolve(database, file)?;

        let bind = args
            .bind
            .or(file.bind)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5000)));
        let drive_folder_id = args
            .drive_folder_id
            .or_else(|| file.drive_folder_id.clone())
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::Missing {
                key: "DRIVE_FOLDER_ID",
            })?;
        let staging_dir = args
            .staging_dir
            .or_else(|| file.staging_dir.clone())
            .unwrap_or_else(std::env::temp_dir);
        let max_upload_bytes = args
            .max_upload_bytes
            .or(file.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        if max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_upload_bytes",
                reason: String::from("must be greater than zero"),
            });
        }

        let jwt_secret = required_secret(&env, JWT_SECRET_ENV)?;
        let drive_credentials = required_secret(&env, DRIVE_CREDENTIALS_ENV)?;

        Ok(Self {
            bind,
            database,
            jwt_secret,
            drive_credentials,
            drive_folder_id,
            staging_dir,
            max_upload_bytes,
        })
    }
}

pub fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn required_secret(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<SecretString, ConfigError> {
    env(key)
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
        .ok_or(ConfigError::Missing { key })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use anyhow::Result;
    use clap::Parser;
    use secrecy::ExposeSecret;
    use tempfile::tempdir;

    use super::{
        read_file_config, Cli, Command, ConfigError, DatabaseArgs, FileConfig, ServeArgs,
        ServeConfig,
    };

    fn env_with(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> impl Fn(&str) -> Option<String> {
        env_with(&[
            ("JWT_SECRET_KEY", "signing"),
            ("GOOGLE_APPLICATION_CREDENTIALS_JSON", "{}"),
        ])
    }

    fn db_args() -> DatabaseArgs {
        DatabaseArgs {
            user: Some(String::from("shop")),
            database: Some(String::from("shopdb")),
            ..Default::default()
        }
    }

    fn file_config(raw: &str) -> FileConfig {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn serve_config_applies_defaults() -> Result<()> {
        let args = ServeArgs {
            drive_folder_id: Some(String::from("folder")),
            ..Default::default()
        };
        let config = ServeConfig::resolve(args, db_args(), &FileConfig::default(), full_env())?;

        assert_eq!(config.bind.to_string(), "0.0.0.0:5000");
        assert_eq!(config.database.host, "127.0.0.1");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.password.expose_secret(), "");
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.jwt_secret.expose_secret(), "signing");
        Ok(())
    }

    #[test]
    fn cli_arguments_override_config_file() -> Result<()> {
        let file = file_config(
            "bind = \"127.0.0.1:9000\"\ndrive_folder_id = \"from-file\"\nstaging_dir = \"/var/tmp/shop\"\n[database]\nhost = \"db.internal\"\nport = 3307\nuser = \"file-user\"\nname = \"filedb\"\n",
        );
        let args = ServeArgs {
            drive_folder_id: Some(String::from("from-cli")),
            ..Default::default()
        };
        let config = ServeConfig::resolve(args, db_args(), &file, full_env())?;

        assert_eq!(config.bind.to_string(), "127.0.0.1:9000");
        assert_eq!(config.drive_folder_id, "from-cli");
        assert_eq!(config.staging_dir, PathBuf::from("/var/tmp/shop"));
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 3307);
        assert_eq!(config.database.user, "shop");
        assert_eq!(config.database.database, "shopdb");
        Ok(())
    }

    #[test]
    fn missing_secrets_are_reported_by_name() {
        let args = ServeArgs {
            drive_folder_id: Some(String::from("folder")),
            ..Default::default()
        };
        let err = ServeConfig::resolve(
            args,
            db_args(),
            &FileConfig::default(),
            env_with(&[("GOOGLE_APPLICATION_CREDENTIALS_JSON", "{}")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "JWT_SECRET_KEY" }));
    }

    #[test]
    fn missing_database_name_is_an_error() {
        let args = ServeArgs {
            drive_folder_id: Some(String::from("folder")),
            ..Default::default()
        };
        let db = DatabaseArgs {
            user: Some(String::from("shop")),
            ..Default::default()
        };
        let err = ServeConfig::resolve(args, db, &FileConfig::default(), full_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "MYSQL_DB" }));
    }

    #[test]
    fn zero_upload_limit_is_rejected() {
        let args = ServeArgs {
            drive_folder_id: Some(String::from("folder")),
            max_upload_bytes: Some(0),
            ..Default::default()
        };
        let err =
            ServeConfig::resolve(args, db_args(), &FileConfig::default(), full_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn config_file_rejects_unknown_keys() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("shop-admin.toml");
        std::fs::write(&path, "bnid = \"0.0.0.0:1\"\n")?;

        let result = read_file_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        Ok(())
    }

    #[test]
    fn cli_parses_create_admin_subcommand() {
        let cli = Cli::try_parse_from([
            "shop-admin",
            "create-admin",
            "--email",
            "ops@shop.test",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::CreateAdmin { ref email }) if email == "ops@shop.test"
        ));
    }

    #[test]
    fn cli_without_subcommand_takes_serve_flags() {
        let cli = Cli::try_parse_from([
            "shop-admin",
            "--bind",
            "127.0.0.1:8080",
            "--staging-dir",
            "/var/tmp/uploads",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.bind, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(cli.serve.staging_dir, Some(PathBuf::from("/var/tmp/uploads")));
    }

    #[test]
    fn database_flags_parse_on_either_side_of_subcommand() {
        let before = Cli::try_parse_from([
            "shop-admin",
            "--mysql-host",
            "db.internal",
            "create-admin",
            "--email",
            "ops@shop.test",
        ])
        .unwrap();
        assert_eq!(before.database.host.as_deref(), Some("db.internal"));
        assert!(matches!(before.command, Some(Command::CreateAdmin { .. })));

        let after = Cli::try_parse_from([
            "shop-admin",
            "serve",
            "--mysql-port",
            "3307",
            "--bind",
            "127.0.0.1:8080",
        ])
        .unwrap();
        assert_eq!(after.database.port, Some(3307));
        assert!(matches!(
            after.command,
            Some(Command::Serve(ref args)) if args.bind == Some("127.0.0.1:8080".parse().unwrap())
        ));
    }
}
