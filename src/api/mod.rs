//! API layer
//!
//! HTTP read handlers for:
//! - ActivityPub collections (inbox, outbox, followers, following,
//!   likes, shares)
//! - Single activities and the service actor document
//! - Metrics (Prometheus)

mod auth;
mod collections;
pub mod metrics;

pub use auth::{
    authorize, AuthTokenManager, ConfigAuthTokenManager, RejectAllVerifier, SignatureVerifier,
};
pub use collections::activitypub_router;
pub use metrics::metrics_router;
