use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Prefix shared by every environment variable the relay reads
pub const ENV_PREFIX: &str = "YJS_";

/// Relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listen host for the relay socket
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port for the relay socket
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between two persistence ticks
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    /// Seconds to wait for connections to leave their rooms on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Database URL
    pub db_url: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Port of the admin HTTP API (disabled when unset)
    pub api_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match Self::from_vars(std::env::vars()) {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(e)
            }
        }
    }

    /// Build a configuration from explicit key/value pairs (keys carry the `YJS_` prefix)
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Config>(vars)
            .map_err(ConfigError::EnvError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.persist_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "YJS_PERSIST_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }
        if self.port != 0 && self.api_port == Some(self.port) {
            return Err(ConfigError::Invalid(format!(
                "YJS_API_PORT must differ from YJS_PORT ({})",
                self.port
            )));
        }
        Ok(())
    }

    /// Get the full relay address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the admin API address, if the admin API is enabled
    pub fn api_address(&self) -> Option<String> {
        self.api_port.map(|port| format!("{}:{}", self.host, port))
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            persist_interval_secs: default_persist_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            db_url: None,
            db_max_connections: default_db_max_connections(),
            api_port: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_persist_interval_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_db_max_connections() -> u32 {
    10
}
