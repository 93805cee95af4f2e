use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the loads service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration (in-memory store when absent)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Archival policy and scheduler configuration
    #[serde(default)]
    pub archival: ArchivalConfig,
    /// Fuel analytics configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Photo field sanitization configuration
    #[serde(default)]
    pub photos: PhotoConfig,
    /// Activity log configuration
    #[serde(default)]
    pub activity_log: ActivityLogConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Archival policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchivalConfig {
    /// Days after delivery before a qualifying load may be archived
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Statuses that make a load eligible for archival
    #[serde(default = "default_eligible_statuses")]
    pub eligible_statuses: Vec<String>,
    /// Purge threshold used when a purge request omits one
    #[serde(default = "default_purge_days")]
    pub default_purge_days: u32,
    /// Interval between scheduled sweeps in seconds (0 disables the scheduler)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Concurrent store writes during a sweep
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
}

/// Fuel analytics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Fallback diesel price in USD per gallon
    #[serde(default = "default_diesel_price")]
    pub diesel_price_per_gallon: f64,
    /// Fallback gasoline price in USD per gallon
    #[serde(default = "default_gasoline_price")]
    pub gasoline_price_per_gallon: f64,
    /// How long computed analytics stay cached, in milliseconds
    #[serde(default = "default_analytics_ttl_ms")]
    pub cache_ttl_ms: i64,
}

/// Photo field sanitization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoConfig {
    /// Maximum number of photos kept per load
    #[serde(default = "default_max_photos")]
    pub max_photos: usize,
    /// Maximum UTF-8 length of a single photo URL
    #[serde(default = "default_max_url_bytes")]
    pub max_url_bytes: usize,
    /// Byte quota for the serialized photo field
    #[serde(default = "default_field_quota_bytes")]
    pub field_quota_bytes: usize,
    /// Object storage host whose URLs are accepted regardless of extension
    #[serde(default = "default_storage_host")]
    pub storage_host: String,
    /// Accepted image extensions (lowercase, without the dot)
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

/// Activity log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityLogConfig {
    /// Maximum number of retained entries
    #[serde(default = "default_activity_capacity")]
    pub capacity: usize,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Shared secret required by the archival trigger endpoints
    #[serde(default)]
    pub archive_secret: Option<String>,
    /// Header carrying the shared secret
    #[serde(default = "default_secret_header")]
    pub secret_header: String,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "loads-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_window_days() -> u32 {
    7
}

fn default_eligible_statuses() -> Vec<String> {
    vec!["completed".to_string(), "archived".to_string()]
}

fn default_purge_days() -> u32 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_write_concurrency() -> usize {
    8
}

fn default_diesel_price() -> f64 {
    4.10
}

fn default_gasoline_price() -> f64 {
    3.65
}

fn default_analytics_ttl_ms() -> i64 {
    5 * 60 * 1000
}

fn default_max_photos() -> usize {
    20
}

fn default_max_url_bytes() -> usize {
    1024
}

fn default_field_quota_bytes() -> usize {
    1_000_000
}

fn default_storage_host() -> String {
    "firebasestorage.googleapis.com".to_string()
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "bmp"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_activity_capacity() -> usize {
    200
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_secret_header() -> String {
    "x-archive-secret".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "loads-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/loads").required(false))
            .add_source(config::File::with_name("/etc/haulbook/loads").required(false))
            // LOADS__API__ARCHIVE_SECRET -> api.archive_secret
            .add_source(
                config::Environment::with_prefix("LOADS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Interval between scheduled sweeps, `None` when the scheduler is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.archival.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl ArchivalConfig {
    /// Archival window as a chrono duration
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.window_days))
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            eligible_statuses: default_eligible_statuses(),
            default_purge_days: default_purge_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            write_concurrency: default_write_concurrency(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            diesel_price_per_gallon: default_diesel_price(),
            gasoline_price_per_gallon: default_gasoline_price(),
            cache_ttl_ms: default_analytics_ttl_ms(),
        }
    }
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            max_photos: default_max_photos(),
            max_url_bytes: default_max_url_bytes(),
            field_quota_bytes: default_field_quota_bytes(),
            storage_host: default_storage_host(),
            image_extensions: default_image_extensions(),
        }
    }
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_activity_capacity(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            archive_secret: None,
            secret_header: default_secret_header(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_window_days(), 7);
        assert_eq!(default_diesel_price(), 4.10);
        assert_eq!(default_gasoline_price(), 3.65);
        assert_eq!(default_max_photos(), 20);
        assert_eq!(default_field_quota_bytes(), 1_000_000);
    }

    #[test]
    fn test_sweep_interval_disabled_at_zero() {
        let mut config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(3600)));

        config.archival.sweep_interval_secs = 0;
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.archival.eligible_statuses, vec!["completed", "archived"]);
        assert_eq!(config.api.secret_header, "x-archive-secret");
        assert_eq!(config.archival.window(), chrono::Duration::days(7));
    }
}
