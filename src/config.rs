//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub service: ServiceConfig,
    pub pubsub: PubSubConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "orb.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the node
    ///
    /// # Returns
    /// Full URL like "https://orb.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// ActivityPub service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name, becomes the path segment in `/services/{name}`
    pub name: String,
    /// Page size for ordered collection pages
    pub page_size: usize,
}

/// In-process publisher/subscriber configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    /// Seconds to wait for an Ack or Nack before a message is
    /// considered undeliverable
    pub timeout_seconds: u64,
    /// Maximum number of concurrently tracked messages
    pub concurrency: usize,
    /// Buffer size for subscriber and publish channels
    pub buffer_size: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            concurrency: 20,
            buffer_size: 20,
        }
    }
}

impl PubSubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Authentication configuration for the read endpoints
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Bearer token required for authenticated reads.
    ///
    /// When unset, all read endpoints are open.
    pub read_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from defaults, files and environment.
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("service.name", "orb")?
            .set_default("service.page_size", 50)?
            .set_default("pubsub.timeout_seconds", 10)?
            .set_default("pubsub.concurrency", 20)?
            .set_default("pubsub.buffer_size", 20)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (ORBNODE_*)
            .add_source(
                Environment::with_prefix("ORBNODE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// The IRI of the local ActivityPub service.
    pub fn service_iri(&self) -> Url {
        let iri = format!("{}/services/{}", self.server.base_url(), self.service.name);

        // The base URL and service name are validated at load time.
        Url::parse(&iri).expect("service IRI is a valid URL")
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.service.name.is_empty() {
            return Err(crate::error::AppError::Config(
                "service.name must not be empty".to_string(),
            ));
        }

        if self.service.page_size == 0 {
            return Err(crate::error::AppError::Config(
                "service.page_size must be greater than 0".to_string(),
            ));
        }

        if self.pubsub.buffer_size == 0 || self.pubsub.concurrency == 0 {
            return Err(crate::error::AppError::Config(
                "pubsub.buffer_size and pubsub.concurrency must be greater than 0".to_string(),
            ));
        }

        let iri = format!("{}/services/{}", self.server.base_url(), self.service.name);
        Url::parse(&iri).map_err(|e| {
            crate::error::AppError::Config(format!("invalid service IRI [{}]: {}", iri, e))
        })?;

        Ok(())
    }
}
