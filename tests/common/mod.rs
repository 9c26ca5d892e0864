//! Common test utilities for E2E tests

use orbnode::{config, AppState};
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance with open read endpoints.
    pub async fn new() -> Self {
        Self::with_read_token(None).await
    }

    /// Create a new test server instance requiring the given bearer
    /// token on read endpoints.
    pub async fn with_read_token(read_token: Option<&str>) -> Self {
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "orb1.example.com".to_string(),
                protocol: "http".to_string(),
            },
            service: config::ServiceConfig {
                name: "orb".to_string(),
                page_size: 5,
            },
            pubsub: config::PubSubConfig::default(),
            auth: config::AuthConfig {
                read_token: read_token.map(str::to_string),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).unwrap();

        // Bind an ephemeral port and serve the router
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = orbnode::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            addr,
            state,
            client,
        }
    }

    /// Build a URL for the test server
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }
}
