use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use domain::services::{SweepPolicy, WorkerSettings};
use shared::jwt::{JwtConfig, JwtError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    /// JWT authentication configuration
    pub jwt: JwtAuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub object_storage: ObjectStorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Grace period for background jobs on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Required with the postgres backend.
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Export requests allowed per owner per hour. 0 disables the limit.
    #[serde(default = "default_export_rate_limit")]
    pub export_rate_limit_per_hour: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_export_rate_limit() -> u32 {
    30
}

/// Token validation settings. An RSA public key selects RS256, otherwise
/// the shared secret is used with HS256.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtAuthConfig {
    #[serde(default)]
    pub secret: String,

    /// RSA public key in PEM format for verifying tokens
    #[serde(default)]
    pub public_key: String,

    /// RSA private key in PEM format. Only needed to issue tokens.
    #[serde(default)]
    pub private_key: String,

    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: i64,

    /// Leeway in seconds for clock skew tolerance
    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

impl JwtAuthConfig {
    pub fn has_key_material(&self) -> bool {
        !self.public_key.is_empty() || !self.secret.is_empty()
    }

    /// Builds the validation config once at startup.
    pub fn build(&self) -> Result<JwtConfig, JwtError> {
        if self.public_key.is_empty() {
            JwtConfig::from_secret(
                &self.secret,
                self.access_token_expiry_secs,
                self.leeway_secs,
            )
        } else {
            JwtConfig::from_rsa_pem(
                Some(self.private_key.as_str()),
                &self.public_key,
                self.access_token_expiry_secs,
                self.leeway_secs,
            )
        }
    }
}

fn default_access_token_expiry() -> i64 {
    3600 // 1 hour
}

fn default_jwt_leeway() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local store and queue. Jobs do not survive a restart.
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Export pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Run worker loops in this process.
    #[serde(default = "default_true")]
    pub worker_enabled: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deliveries drained per worker tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease on a received task before it becomes receivable again.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub notify_on_completion: bool,

    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,

    /// Re-read period of a job streamed over SSE, for updates published
    /// by another process or dropped on lag.
    #[serde(default = "default_event_resync")]
    pub event_resync_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,

    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_secs: u64,

    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: i64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            workers: default_workers(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout(),
            notify_on_completion: true,
            notification_buffer: default_notification_buffer(),
            event_resync_secs: default_event_resync(),
            sweep_interval_secs: default_sweep_interval(),
            pending_timeout_secs: default_pending_timeout(),
            processing_timeout_secs: default_processing_timeout(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

impl ExportConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn event_resync_interval(&self) -> Duration {
        Duration::from_secs(self.event_resync_secs.max(1))
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            notify_on_completion: self.notify_on_completion,
        }
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            pending_timeout: chrono::Duration::seconds(self.pending_timeout_secs as i64),
            processing_timeout: chrono::Duration::seconds(self.processing_timeout_secs as i64),
            batch_size: self.sweep_batch_size,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    2
}
fn default_batch_size() -> usize {
    10
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_visibility_timeout() -> u64 {
    300
}
fn default_notification_buffer() -> usize {
    domain::services::DEFAULT_NOTIFICATION_BUFFER
}
fn default_event_resync() -> u64 {
    30
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_pending_timeout() -> u64 {
    900
}
fn default_processing_timeout() -> u64 {
    3600
}
fn default_sweep_batch_size() -> i64 {
    100
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStorageProvider {
    /// Files under `local_root`.
    #[default]
    Local,
    /// S3-compatible `PUT {endpoint}/{bucket}/{key}`.
    Http,
}

/// Where export artifacts are uploaded.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageConfig {
    #[serde(default)]
    pub provider: ObjectStorageProvider,

    #[serde(default = "default_local_root")]
    pub local_root: String,

    /// Base of the URLs handed back to clients.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Bearer token for the upload endpoint. Empty sends no credentials.
    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_upload_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            provider: ObjectStorageProvider::Local,
            local_root: default_local_root(),
            public_base_url: default_public_base_url(),
            endpoint: String::new(),
            bucket: default_bucket(),
            access_token: String::new(),
            timeout_ms: default_upload_timeout_ms(),
        }
    }
}

fn default_local_root() -> String {
    "./data/exports".to_string()
}
fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}
fn default_bucket() -> String {
    "inventory-exports".to_string()
}
fn default_upload_timeout_ms() -> u64 {
    30000
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with INV__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("INV")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("security.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// This method creates a config entirely from defaults and overrides,
    /// without relying on config files (which may not be accessible during tests).
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 20
            min_connections = 2
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []
            export_rate_limit_per_hour = 30

            [jwt]
            secret = "test-secret"
            access_token_expiry_secs = 3600
            leeway_secs = 30

            [storage]
            backend = "postgres"

            [export]
            workers = 2

            [object_storage]
            provider = "local"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "INV__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if !self.jwt.has_key_material() {
            return Err(ConfigValidationError::MissingRequired(
                "jwt.secret or jwt.public_key must be set".to_string(),
            ));
        }

        if self.export.worker_enabled && self.export.workers == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.workers must be at least 1 when the worker is enabled".to_string(),
            ));
        }

        if self.export.batch_size == 0 || self.export.sweep_batch_size <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export batch sizes must be positive".to_string(),
            ));
        }

        if self.object_storage.provider == ObjectStorageProvider::Http
            && self.object_storage.endpoint.is_empty()
        {
            return Err(ConfigValidationError::MissingRequired(
                "object_storage.endpoint is required for the http provider".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
