//! Configuration module for zero-common
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion, `ZC_*` environment overrides and
//! validation. Every consumer receives its section explicitly; nothing in the
//! crate reads configuration from a global.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Storage drivers understood by [`crate::upload::build_uploader`]
pub const STORAGE_DRIVERS: &[&str] = &["local", "oss"];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;

        if let Some(ref jwt) = self.jwt {
            if jwt.secret.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "JWT secret cannot be empty".into(),
                ));
            }
            if jwt.expire_seconds <= 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid JWT expiry {}: must be positive",
                    jwt.expire_seconds
                )));
            }
        }

        if let Some(ref database) = self.database {
            database.check()?;
        }

        match self.log.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level '{}': must be trace, debug, info, warn or error",
                    other
                )))
            }
        }

        Ok(())
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Storage backend configuration
///
/// ```yaml
/// storage:
///   driver: oss
///   oss:
///     endpoint: "https://oss-cn-hangzhou.aliyuncs.com"
///     access_key_id: "${OSS_ACCESS_KEY_ID}"
///     access_key_secret: "${OSS_ACCESS_KEY_SECRET}"
///     bucket_name: "uploads"
///     region: "oss-cn-hangzhou"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `local` or `oss`. Default: `local`
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub local: LocalStorageConfig,
    #[serde(default)]
    pub oss: OssStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            local: LocalStorageConfig::default(),
            oss: OssStorageConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Validate the section for the selected driver
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.driver.as_str() {
            "local" => {
                if self.local.directory.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "Local storage directory cannot be empty".into(),
                    ));
                }
            }
            "oss" => {
                if self.oss.endpoint.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "OSS endpoint cannot be empty".into(),
                    ));
                }
                if !is_valid_http_url(&self.oss.endpoint) {
                    return Err(ConfigError::ValidationError(
                        "Invalid OSS endpoint: must start with http:// or https://".into(),
                    ));
                }
                if self.oss.bucket_name.trim().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "OSS bucket name cannot be empty".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported storage driver '{}': must be one of {:?}",
                    other, STORAGE_DRIVERS
                )))
            }
        }
        Ok(())
    }
}

fn default_driver() -> String {
    "local".to_string()
}

/// Local filesystem storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory every object key resolves beneath. Default: `storage`
    #[serde(default = "default_directory")]
    pub directory: String,
    /// Public URL prefix the directory is served from, if any
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            base_url: None,
        }
    }
}

fn default_directory() -> String {
    "storage".to_string()
}

/// Remote object storage (S3-compatible API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OssStorageConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub access_key_secret: Option<String>,
    #[serde(default)]
    pub bucket_name: String,
    /// Public URL of the bucket, if any
    #[serde(default)]
    pub bucket_url: Option<String>,
    /// Signing region. Default: `us-east-1`
    #[serde(default = "default_region")]
    pub region: String,
    /// Address the bucket in the path instead of the host name
    #[serde(default)]
    pub path_style: bool,
}

impl Default for OssStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key_id: None,
            access_key_secret: None,
            bucket_name: String::new(),
            bucket_url: None,
            region: default_region(),
            path_style: false,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

// ============================================================================
// JWT
// ============================================================================

/// JWT minting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    /// Token lifetime in seconds. Default: 86400
    #[serde(default = "default_expire_seconds")]
    pub expire_seconds: i64,
}

fn default_expire_seconds() -> i64 {
    86400
}

// ============================================================================
// Database
// ============================================================================

/// Relational database connection settings.
///
/// Only the DSN is derived here; opening connections belongs to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `mysql`, `postgres` or `sqlite3`. Default: `mysql`
    #[serde(default = "default_db_type")]
    pub db_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_db_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    /// Extra DSN parameters appended verbatim
    #[serde(default)]
    pub config: String,
    /// Table name prefix. Default: `cmf_`
    #[serde(default = "default_db_prefix")]
    pub prefix: String,
    /// Database file for sqlite3
    #[serde(default)]
    pub db_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: default_db_type(),
            host: String::new(),
            port: 0,
            username: default_db_username(),
            password: String::new(),
            db_name: default_db_name(),
            config: String::new(),
            prefix: default_db_prefix(),
            db_path: String::new(),
        }
    }
}

impl DatabaseConfig {
    /// Check that the fields required by the selected type are present
    pub fn check(&self) -> Result<(), ConfigError> {
        match self.db_type.as_str() {
            "sqlite3" => {
                if self.db_path.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "sqlite3 requires db_path".into(),
                    ));
                }
            }
            "mysql" | "postgres" => {
                if self.host.is_empty() || self.port == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "{} requires host and port",
                        self.db_type
                    )));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported database type '{}': must be mysql, postgres or sqlite3",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Build the driver DSN for the selected type
    pub fn dsn(&self) -> Result<String, ConfigError> {
        self.check()?;
        let dsn = match self.db_type.as_str() {
            "mysql" => format!(
                "{}:{}@tcp({}:{})/{}?{}",
                self.username, self.password, self.host, self.port, self.db_name, self.config
            ),
            "postgres" => format!(
                "host={} user={} password={} dbname={} port={} {}",
                self.host, self.username, self.password, self.db_name, self.port, self.config
            ),
            _ => format!(
                "file:{}?_busy_timeout=100000&_fk=1{}",
                self.db_path, self.config
            ),
        };
        Ok(dsn)
    }
}

fn default_db_type() -> String {
    "mysql".to_string()
}

fn default_db_username() -> String {
    "root".to_string()
}

fn default_db_name() -> String {
    "test_db".to_string()
}

fn default_db_prefix() -> String {
    "cmf_".to_string()
}

// ============================================================================
// Captcha & logging
// ============================================================================

/// Captcha store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// Key prefix. Default: `CAPTCHA_`
    #[serde(default = "default_captcha_prefix")]
    pub prefix: String,
    /// Answer lifetime in seconds. Default: 300
    #[serde(default = "default_captcha_expiration")]
    pub expiration_secs: u64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            prefix: default_captcha_prefix(),
            expiration_secs: default_captcha_expiration(),
        }
    }
}

fn default_captcha_prefix() -> String {
    "CAPTCHA_".to_string()
}

fn default_captcha_expiration() -> u64 {
    300
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace, debug, info, warn or error. Default: info
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
