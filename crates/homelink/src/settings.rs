//! Server configuration.
//!
//! Layered as defaults, then the TOML config file, then `HOMELINK__*`
//! environment variables (`HOMELINK__SERVER__PORT=9000`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::db::DatabaseConfig;
use crate::face::FaceConfig;
use crate::liveness::LivenessConfig;
use crate::registry::RegistryConfig;

pub const APP_NAME: &str = "homelink";

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub liveness: LivenessConfig,
    pub registry: RegistryConfig,
    pub face: FaceConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (optional) and the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let built = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(&env_prefix())
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("reading config from {}", path.display()))?;

        built
            .try_deserialize()
            .context("deserializing configuration")
    }

    /// Resolve the database file, expanding `~` and environment variables.
    pub fn database_path(&self, data_dir: &Path) -> Result<PathBuf> {
        match self.database.path {
            Some(ref path) => expand_str_path(path),
            None => Ok(data_dir.join(format!("{APP_NAME}.db"))),
        }
    }
}

/// Write the default configuration to `path`, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Hub users: add [[auth.users]] entries with a bcrypt password_hash\n");
    buffer.push_str("# (generate one with `homelink hash-password`).\n");
    buffer.push('\n');
    buffer
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

/// Environment variable prefix, e.g. `HOMELINK`.
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.liveness.interval_secs, 60);
        assert_eq!(config.liveness.hub_timeout_secs, 120);
        assert_eq!(config.liveness.camera_timeout_secs, 300);
        assert_eq!(config.registry.send_timeout_ms, 5_000);
        assert_eq!(config.registry.channel_capacity, 64);
        assert!((config.face.tolerance - 0.6).abs() < f64::EPSILON);
        assert!(config.auth.users.is_empty());
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.busy_timeout_secs, 30);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.liveness.hub_timeout_secs, 120);
    }

    #[test]
    fn test_written_default_config_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Configuration for homelink"));

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.registry.channel_capacity, 64);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
port = 9100

[liveness]
hub_timeout_secs = 90

[face]
tolerance = 0.45

[[auth.users]]
username = "alice"
user_id = "user-1"
password_hash = "$2b$04$abcdefghijklmnopqrstuv"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.liveness.hub_timeout_secs, 90);
        assert_eq!(config.liveness.camera_timeout_secs, 300);
        assert!((config.face.tolerance - 0.45).abs() < f64::EPSILON);
        assert_eq!(config.auth.users.len(), 1);
        assert_eq!(config.auth.users[0].user_id, "user-1");
    }

    #[test]
    fn test_database_path() {
        let mut config = AppConfig::default();
        let data_dir = Path::new("/var/lib/homelink");
        assert_eq!(
            config.database_path(data_dir).unwrap(),
            data_dir.join("homelink.db")
        );

        config.database.path = Some("/tmp/hubs.db".to_string());
        assert_eq!(
            config.database_path(data_dir).unwrap(),
            PathBuf::from("/tmp/hubs.db")
        );
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix(), "HOMELINK");
    }
}
