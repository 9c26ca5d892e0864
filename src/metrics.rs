//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "orbnode_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Activity handler metrics
    pub static ref ACTIVITIES_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_activities_received_total", "Total number of activities received by the handler"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_HANDLED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_activities_handled_total", "Total number of activities handled, by outcome"),
        &["activity_type", "outcome"]
    ).expect("metric can be created");
    pub static ref DUPLICATE_ACTIVITIES_TOTAL: IntCounter = IntCounter::new(
        "orbnode_duplicate_activities_total",
        "Total number of activities dropped because their ID was already stored"
    ).expect("metric can be created");
    pub static ref OUTBOX_ACTIVITIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_outbox_activities_total", "Total number of activities posted to the outbox"),
        &["activity_type"]
    ).expect("metric can be created");

    // Pub/sub metrics
    pub static ref PUBSUB_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_pubsub_published_total", "Total number of messages published"),
        &["topic"]
    ).expect("metric can be created");
    pub static ref PUBSUB_ACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_pubsub_acks_total", "Total number of message acknowledgement outcomes"),
        &["result"]
    ).expect("metric can be created");
    pub static ref PUBSUB_UNDELIVERABLE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_pubsub_undeliverable_total", "Total number of messages routed to the undeliverable topic"),
        &["outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("orbnode_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_RECEIVED_TOTAL.clone()))
        .expect("ACTIVITIES_RECEIVED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ACTIVITIES_HANDLED_TOTAL.clone()))
        .expect("ACTIVITIES_HANDLED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DUPLICATE_ACTIVITIES_TOTAL.clone()))
        .expect("DUPLICATE_ACTIVITIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(OUTBOX_ACTIVITIES_TOTAL.clone()))
        .expect("OUTBOX_ACTIVITIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PUBSUB_PUBLISHED_TOTAL.clone()))
        .expect("PUBSUB_PUBLISHED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PUBSUB_ACKS_TOTAL.clone()))
        .expect("PUBSUB_ACKS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PUBSUB_UNDELIVERABLE_TOTAL.clone()))
        .expect("PUBSUB_UNDELIVERABLE_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");
}
