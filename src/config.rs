use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for galley
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GalleyConfig {
    /// Report backend connection
    pub backend: BackendConfig,
    /// Synchronization loop tuning
    pub sync: SyncSettings,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the research-automation backend
    pub base_url: String,
    /// Bearer token (can be set via env var)
    pub token: Option<String>,
    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Base delay between polls while work is outstanding
    pub poll_interval_ms: u64,
    /// Backoff ceiling on consecutive transport failures
    pub max_backoff_ms: u64,
    /// Failures tolerated before the first successful sync escalates
    pub escalation_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for GalleyConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                base_url: "http://localhost:8080".to_string(),
                token: None, // Read from env var when absent
                rate_limit: RateLimitConfig {
                    requests_per_second: 5,
                    burst_capacity: 10,
                },
            },
            sync: SyncSettings {
                poll_interval_ms: 2_000,
                max_backoff_ms: 30_000,
                escalation_attempts: 3,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
        }
    }
}

impl GalleyConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (galley.toml)
    /// 3. Environment variables (prefixed with GALLEY_)
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&GalleyConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if Path::new("galley.toml").exists() {
            builder = builder.add_source(File::with_name("galley"));
        }

        builder = builder.add_source(
            Environment::with_prefix("GALLEY")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut galley_config: GalleyConfig = config.try_deserialize()?;

        // Token is usually supplied out-of-band
        if galley_config.backend.token.is_none() {
            if let Ok(token) = std::env::var("GALLEY_BACKEND_TOKEN") {
                galley_config.backend.token = Some(token);
            }
        }

        Ok(galley_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<GalleyConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = GalleyConfig::load_env_file();
        GalleyConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static GalleyConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
