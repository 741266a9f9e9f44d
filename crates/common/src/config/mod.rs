//! Configuration management for Cinema services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Every section has defaults, so the ETL service and the gateway can share
//! one `AppConfig` while each only sets the parts it uses.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration (gateway)
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational store configuration (gateway)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis connection configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Pub/sub channel configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Upstream metadata source (ETL)
    #[serde(default)]
    pub tmdb: TmdbConfig,

    /// Extraction schedule (ETL)
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Batch materialization (gateway)
    #[serde(default)]
    pub materializer: MaterializerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Channel carrying movie batches
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Upper bound for a single publish, in milliseconds
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,

    /// Decoded batches buffered between subscription and materializer
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Wait before resubscribing after a lost connection, in milliseconds
    #[serde(default = "default_resubscribe_delay")]
    pub resubscribe_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    /// API base URL
    #[serde(default = "default_tmdb_base_url")]
    pub base_url: String,

    /// Bearer credential
    #[serde(default)]
    pub bearer_token: String,

    /// Per-item request timeout in milliseconds
    #[serde(default = "default_tmdb_timeout")]
    pub request_timeout_ms: u64,

    /// Response language
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    /// First source id to fetch
    #[serde(default = "default_start_id")]
    pub start_id: i64,

    /// Ids fetched per tick
    #[serde(default = "default_extract_batch_size")]
    pub batch_size: i64,

    /// Tick interval in seconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaterializerConfig {
    /// Upper bound for one batch transaction, in milliseconds
    #[serde(default = "default_materializer_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name attached to log lines
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_url() -> String { "postgres://localhost/cinema".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_channel() -> String { "movies".to_string() }
fn default_publish_timeout() -> u64 { 5_000 }
fn default_subscriber_buffer() -> usize { 16 }
fn default_resubscribe_delay() -> u64 { 1_000 }
fn default_tmdb_base_url() -> String { "https://api.themoviedb.org".to_string() }
fn default_tmdb_timeout() -> u64 { 5_000 }
fn default_language() -> String { "en-US".to_string() }
fn default_start_id() -> i64 { 1 }
fn default_extract_batch_size() -> i64 { 10 }
fn default_tick_interval() -> u64 { 60 }
fn default_materializer_timeout() -> u64 { 5_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "cinema".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            auto_migrate: false,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: default_redis_url() }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            publish_timeout_ms: default_publish_timeout(),
            subscriber_buffer: default_subscriber_buffer(),
            resubscribe_delay_ms: default_resubscribe_delay(),
        }
    }
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            base_url: default_tmdb_base_url(),
            bearer_token: String::new(),
            request_timeout_ms: default_tmdb_timeout(),
            language: default_language(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            start_id: default_start_id(),
            batch_size: default_extract_batch_size(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self { timeout_ms: default_materializer_timeout() }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__EXTRACTOR__BATCH_SIZE=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.publish_timeout_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.transport.resubscribe_delay_ms)
    }

    pub fn tmdb_request_timeout(&self) -> Duration {
        Duration::from_millis(self.tmdb.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.extractor.tick_interval_secs)
    }

    pub fn materializer_timeout(&self) -> Duration {
        Duration::from_millis(self.materializer.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.transport.channel, "movies");
        assert_eq!(config.extractor.start_id, 1);
        assert_eq!(config.extractor.batch_size, 10);
        assert_eq!(config.tmdb.base_url, "https://api.themoviedb.org");
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/cinema");
    }

    #[test]
    fn test_duration_accessors() {
        let config = AppConfig::default();
        assert_eq!(config.publish_timeout(), Duration::from_secs(5));
        assert_eq!(config.tmdb_request_timeout(), Duration::from_secs(5));
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.materializer_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "extractor": { "batch_size": 3 },
            "transport": { "channel": "backfill" }
        }))
        .unwrap();

        assert_eq!(config.extractor.batch_size, 3);
        assert_eq!(config.extractor.start_id, 1);
        assert_eq!(config.transport.channel, "backfill");
        assert_eq!(config.transport.publish_timeout_ms, 5_000);
        assert_eq!(config.database.url, "postgres://localhost/cinema");
    }
}
