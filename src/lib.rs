//! orbnode - a federated anchoring node
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - ActivityPub read endpoints (collections, activities)     │
//! │  - Metrics                                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Activity handler (Create/Follow/Accept/Reject/...)       │
//! │  - In-process pub/sub fabric                                │
//! │  - Local outbox                                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Activity store SPI (in-memory implementation)            │
//! │  - Anchor vocabulary, hashlinks, did:orb generator          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP read handlers for ActivityPub collections
//! - `service`: activity handler, pub/sub fabric, outbox
//! - `store`: activity store SPI and in-memory implementation
//! - `vocab`: typed ActivityPub / anchoring vocabulary
//! - `anchor`: operation-batch payloads and the did:orb generator
//! - `hashlink`: content-addressed URL codec
//! - `config`: configuration management
//! - `error`: error types

pub mod anchor;
pub mod api;
pub mod config;
pub mod error;
pub mod hashlink;
pub mod metrics;
pub mod service;
pub mod store;
pub mod vocab;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the activity store and the pub/sub fabric.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Activity store
    pub store: Arc<dyn store::ActivityStore>,

    /// Inbound activity handler
    pub handler: Arc<service::ActivityHandler>,

    /// In-process publisher/subscriber
    pub pubsub: Arc<service::pubsub::PubSub>,

    /// Signature verifier for the read endpoints
    pub verifier: Arc<dyn api::SignatureVerifier>,

    /// Auth token manager for the read endpoints
    pub token_manager: Arc<dyn api::AuthTokenManager>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Create the in-memory activity store
    /// 2. Start the pub/sub fabric
    /// 3. Wire the local outbox
    /// 4. Start the activity handler
    ///
    /// The anchor-credential handler and follower authorization are
    /// collaborator seams; deployments inject them on the handler
    /// before serving write traffic.
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let service_iri = config.service_iri();

        // 1. Activity store
        let store: Arc<dyn store::ActivityStore> =
            Arc::new(store::MemStore::new(&config.service.name));
        tracing::info!("Activity store initialized");

        // 2. Pub/sub fabric (started on construction)
        let pubsub = Arc::new(service::pubsub::PubSub::new(
            &config.service.name,
            service::pubsub::Config::from(&config.pubsub),
        ));
        tracing::info!("Publisher/subscriber started");

        // 3. Local outbox
        let outbox = Arc::new(service::LocalOutbox::new(
            service_iri.clone(),
            store.clone(),
            pubsub.clone(),
        ));

        // 4. Activity handler
        let handler = Arc::new(service::ActivityHandler::new(
            service::HandlerConfig {
                service_name: config.service.name.clone(),
                service_iri,
                buffer_size: config.pubsub.buffer_size,
            },
            store.clone(),
            outbox,
        ));
        handler.start();
        tracing::info!("Activity handler started");

        let verifier: Arc<dyn api::SignatureVerifier> = Arc::new(api::RejectAllVerifier);
        let token_manager: Arc<dyn api::AuthTokenManager> =
            Arc::new(api::ConfigAuthTokenManager::new(&config.auth));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            store,
            handler,
            pubsub,
            verifier,
            token_manager,
        })
    }

    /// Stop the long-lived services.
    ///
    /// The handler stops first so in-flight activities finish before
    /// the fabric closes the subscriber channels.
    pub async fn shutdown(&self) {
        self.handler.stop();
        self.pubsub.stop().await;
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::activitypub_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
