//! Configuration management for the HookRelay service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hookrelay_delivery::{
    client::ClientConfig, DeliveryConfig, DEFAULT_BACKOFF_TABLE_SECS,
    DEFAULT_IN_FLIGHT_LEASE_SECS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TIMEOUT_SECONDS,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "hookrelay.toml";
const ENV_PREFIX: &str = "HOOKRELAY_";

/// Service configuration with defaults, file, and environment overrides.
///
/// Sources in priority order:
/// 1. Environment variables prefixed with `HOOKRELAY_` (e.g.
///    `HOOKRELAY_PORT`), plus a bare `DATABASE_URL`
/// 2. `hookrelay.toml` in the working directory
/// 3. Built-in defaults
///
/// # Example
///
/// ```no_run
/// use hookrelay_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    #[serde(default = "default_min_connections")]
    pub database_min_connections: u32,
    /// Connection acquire timeout in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub database_acquire_timeout_secs: u64,
    /// Connection idle timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub database_idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds.
    #[serde(default = "default_max_lifetime")]
    pub database_max_lifetime_secs: u64,

    // Server
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    // Delivery
    /// Seconds between automatic scans.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Timeout of one delivery request in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    /// Seconds an in-flight event stays hidden from later scans.
    #[serde(default = "default_in_flight_lease")]
    pub in_flight_lease_secs: u64,
    /// Stored response text is truncated beyond this many bytes.
    #[serde(default = "default_max_response_body_bytes")]
    pub max_response_body_bytes: usize,
    /// User agent sent with deliveries.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Retry delays in seconds for subscriptions without a fixed interval.
    #[serde(default = "default_backoff_table")]
    pub backoff_table_secs: Vec<u64>,

    // Logging
    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Config {
    /// Loads configuration from defaults, `hookrelay.toml` and the
    /// environment, then validates it.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().only(&["DATABASE_URL"]))
            .merge(Env::prefixed(ENV_PREFIX));

        Self::from_figment(&figment)
    }

    /// Extracts and validates configuration from an assembled figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Engine configuration.
    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            in_flight_lease: Duration::from_secs(self.in_flight_lease_secs),
            client_config: self.client_config(),
            backoff_table: self.backoff_table_secs.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    /// Delivery client configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_secs),
            user_agent: self.user_agent.clone(),
            max_redirects: 3,
            max_response_body_bytes: self.max_response_body_bytes,
        }
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parses the server socket address from host and port.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Database URL with the password masked for logging.
    pub fn database_url_masked(&self) -> String {
        let authority_start = self.database_url.find("://").map_or(0, |pos| pos + 3);
        let authority = &self.database_url[authority_start..];

        if let Some(at_pos) = authority.find('@') {
            if let Some(colon_pos) = authority[..at_pos].find(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(authority_start + colon_pos + 1..authority_start + at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database_min_connections cannot exceed database_max_connections");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        if self.delivery_timeout_secs == 0 {
            anyhow::bail!("delivery_timeout_secs must be greater than 0");
        }

        if self.in_flight_lease_secs <= self.delivery_timeout_secs {
            anyhow::bail!("in_flight_lease_secs must exceed delivery_timeout_secs");
        }

        if self.max_response_body_bytes == 0 {
            anyhow::bail!("max_response_body_bytes must be greater than 0");
        }

        if self.user_agent.trim().is_empty() {
            anyhow::bail!("user_agent must not be empty");
        }

        if self.backoff_table_secs.is_empty() {
            anyhow::bail!("backoff_table_secs must contain at least one delay");
        }

        if self.backoff_table_secs.contains(&0) {
            anyhow::bail!("backoff_table_secs entries must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_acquire_timeout_secs: default_acquire_timeout(),
            database_idle_timeout_secs: default_idle_timeout(),
            database_max_lifetime_secs: default_max_lifetime(),
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            poll_interval_secs: default_poll_interval(),
            delivery_timeout_secs: default_delivery_timeout(),
            in_flight_lease_secs: default_in_flight_lease(),
            max_response_body_bytes: default_max_response_body_bytes(),
            user_agent: default_user_agent(),
            backoff_table_secs: default_backoff_table(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/hookrelay".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    1800
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_delivery_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_in_flight_lease() -> u64 {
    DEFAULT_IN_FLIGHT_LEASE_SECS
}

fn default_max_response_body_bytes() -> usize {
    4096
}

fn default_user_agent() -> String {
    "HookRelay/1.0".to_string()
}

fn default_backoff_table() -> Vec<u64> {
    DEFAULT_BACKOFF_TABLE_SECS.to_vec()
}

fn default_log_filter() -> String {
    "info,hookrelay=debug,tower_http=debug".to_string()
}
