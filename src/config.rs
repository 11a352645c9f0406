//! Configuration management for the render engine server

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::diagnostics::DEFAULT_MEMORY_THRESHOLD_BYTES;
use crate::network::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    /// Remote rasterization service backing server-side conversion
    pub conversion_service_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Orchestrator defaults; `RenderOptions` override them per request
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Network retries per fetch
    pub max_retries: u32,
    pub enable_fallbacks: bool,
    pub enable_diagnostics: bool,
    /// Memory usage above which diagnostics flag a bottleneck, in bytes
    pub memory_pressure_threshold: u64,
    pub progress_update_interval: Duration,
    pub stuck_detection_threshold: Duration,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Maximum cached responses
    pub cache_capacity: usize,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_multiplier: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            enable_fallbacks: true,
            enable_diagnostics: true,
            memory_pressure_threshold: DEFAULT_MEMORY_THRESHOLD_BYTES,
            progress_update_interval: Duration::from_millis(250),
            stuck_detection_threshold: Duration::from_secs(10),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            retry_initial_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(30_000),
            retry_multiplier: 2.0,
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults
    /// for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let engine_defaults = EngineConfig::default();
        let network_defaults = NetworkConfig::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000)?,
            },
            engine: EngineConfig {
                timeout: millis_var("RENDER_TIMEOUT_MS", engine_defaults.timeout)?,
                max_retries: parse_var("RENDER_MAX_RETRIES", engine_defaults.max_retries)?,
                enable_fallbacks: parse_var("RENDER_ENABLE_FALLBACKS", engine_defaults.enable_fallbacks)?,
                enable_diagnostics: parse_var(
                    "RENDER_ENABLE_DIAGNOSTICS",
                    engine_defaults.enable_diagnostics,
                )?,
                memory_pressure_threshold: parse_var(
                    "RENDER_MEMORY_PRESSURE_THRESHOLD",
                    engine_defaults.memory_pressure_threshold,
                )?,
                progress_update_interval: millis_var(
                    "RENDER_PROGRESS_INTERVAL_MS",
                    engine_defaults.progress_update_interval,
                )?,
                stuck_detection_threshold: millis_var(
                    "RENDER_STUCK_THRESHOLD_MS",
                    engine_defaults.stuck_detection_threshold,
                )?,
            },
            network: NetworkConfig {
                cache_enabled: parse_var("NETWORK_CACHE_ENABLED", network_defaults.cache_enabled)?,
                cache_ttl: millis_var("NETWORK_CACHE_TTL_MS", network_defaults.cache_ttl)?,
                cache_capacity: parse_var("NETWORK_CACHE_CAPACITY", network_defaults.cache_capacity)?,
                retry_initial_delay: millis_var(
                    "NETWORK_RETRY_INITIAL_DELAY_MS",
                    network_defaults.retry_initial_delay,
                )?,
                retry_max_delay: millis_var(
                    "NETWORK_RETRY_MAX_DELAY_MS",
                    network_defaults.retry_max_delay,
                )?,
                retry_multiplier: parse_var(
                    "NETWORK_RETRY_MULTIPLIER",
                    network_defaults.retry_multiplier,
                )?,
            },
            conversion_service_url: env::var("CONVERSION_SERVICE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_value(key, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn millis_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_value::<u64>(key, &value).map(Duration::from_millis),
        Err(_) => Ok(default),
    }
}
