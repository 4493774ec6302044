//! Configuration management
//!
//! Configuration is stored in TOML format at `~/.config/minio-mcp/config.toml`
//! unless `MINIO_MCP_CONFIG_DIR` or an explicit path says otherwise.
//! Values are validated and normalized once, on load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "MINIO_MCP_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Identity provider (Keycloak realm) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub server_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Service account used to log in at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl IdentityConfig {
    fn realm_base(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect",
            self.server_url,
            urlencoding::encode(&self.realm)
        )
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.realm_base())
    }

    pub fn userinfo_endpoint(&self) -> String {
        format!("{}/userinfo", self.realm_base())
    }

    /// Username/password pair for the startup login, if both are set
    pub fn service_account(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

/// Wrapped storage REST API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub api_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

/// Event server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub bind_addr: String,
    /// Idle interval after which a connection receives a heartbeat
    pub heartbeat_secs: u64,
    /// Storage health probe interval; 0 disables the monitor
    pub health_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "MinIO MCP Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: "127.0.0.1:8765".to_string(),
            heartbeat_secs: 30,
            health_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// `User-Agent` sent on every outbound request
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and normalize URLs (no trailing slash)
    pub fn validate(&mut self) -> Result<()> {
        self.identity.server_url = normalize_url("identity.server_url", &self.identity.server_url)?;
        self.storage.api_base_url =
            normalize_url("storage.api_base_url", &self.storage.api_base_url)?;

        if self.identity.realm.is_empty() {
            return Err(Error::Config("identity.realm must not be empty".into()));
        }
        if self.identity.client_id.is_empty() {
            return Err(Error::Config("identity.client_id must not be empty".into()));
        }
        if !(1..=300).contains(&self.storage.timeout_secs) {
            return Err(Error::Config(format!(
                "storage.timeout_secs must be between 1 and 300, got {}",
                self.storage.timeout_secs
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.server.heartbeat_secs == 0 {
            return Err(Error::Config("server.heartbeat_secs must be at least 1".into()));
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::Config(format!(
                "logging.level must be one of {VALID_LOG_LEVELS:?}, got '{}'",
                self.logging.level
            )));
        }
        self.logging.level = level;

        Ok(())
    }

    /// Copy suitable for display, with secrets replaced
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.identity.client_secret = "********".to_string();
        if config.identity.password.is_some() {
            config.identity.password = Some("********".to_string());
        }
        config
    }
}

fn normalize_url(field: &str, value: &str) -> Result<String> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(Error::Config(format!(
            "{field} must start with http:// or https://, got '{value}'"
        )));
    }
    url::Url::parse(value).map_err(|e| Error::Config(format!("{field} is not a valid URL: {e}")))?;
    Ok(value.trim_end_matches('/').to_string())
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Locates and loads the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a manager for the default location
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Cannot determine config directory".into()))?
                .join("minio-mcp"),
        };

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
        })
    }

    /// Create a manager for an explicit file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Read, parse and validate the configuration file
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Err(Error::Config(format!(
                "Configuration file not found: {}",
                self.config_path.display()
            )));
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let config = Config::from_toml(&content)?;
        tracing::debug!(path = %self.config_path.display(), "Loaded configuration");
        Ok(config)
    }
}
