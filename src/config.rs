//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::http::{ClientKeyExtractor, DEFAULT_FORWARDED_HEADER};
use crate::ratelimit::{LimitConfig, DEFAULT_BURST, DEFAULT_REFILL_RATE};

/// Prefix for environment variable overrides, e.g. `GATEKEEPER__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Tokens added to each client's bucket per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity (maximum burst per client)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Idle time in seconds after which a client's state is dropped
    #[serde(default = "default_expiration")]
    pub expiration_secs: u64,

    /// Seconds between eviction sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Whether client keys are taken from the forwarded-for header
    #[serde(default = "default_trust_forwarded_for")]
    pub trust_forwarded_for: bool,

    /// Name of the forwarded-for header
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            expiration_secs: default_expiration(),
            cleanup_interval_secs: default_cleanup_interval(),
            trust_forwarded_for: default_trust_forwarded_for(),
            forwarded_header: default_forwarded_header(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    DEFAULT_REFILL_RATE
}

fn default_burst() -> u32 {
    DEFAULT_BURST
}

fn default_expiration() -> u64 {
    180
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_trust_forwarded_for() -> bool {
    true
}

fn default_forwarded_header() -> String {
    DEFAULT_FORWARDED_HEADER.to_string()
}

impl RateLimitingConfig {
    /// Build the validated bucket limits.
    pub fn limit_config(&self) -> Result<LimitConfig> {
        LimitConfig::new(self.burst, self.requests_per_second)
    }

    /// Idle duration after which a visitor is evicted.
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    /// Period between eviction sweeps.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl GatekeeperConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file layered with environment
    /// variables prefixed by [`ENV_PREFIX`].
    ///
    /// Nested keys are separated by a double underscore, so
    /// `GATEKEEPER__RATE_LIMITING__BURST=10` overrides `rate_limiting.burst`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<GatekeeperConfig>())
            .map_err(|e| GatekeeperError::Config(format!("Failed to load configuration: {}", e)))
    }

    /// Check that the configuration can start the subsystem.
    pub fn validate(&self) -> Result<()> {
        let rate_limiting = &self.rate_limiting;

        rate_limiting.limit_config()?;

        if rate_limiting.expiration_secs == 0 {
            return Err(GatekeeperError::Config(
                "expiration_secs must be greater than zero".to_string(),
            ));
        }

        if rate_limiting.cleanup_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }

        ClientKeyExtractor::from_config(rate_limiting)?;

        Ok(())
    }
}
