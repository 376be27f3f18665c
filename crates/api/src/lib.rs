//! Service wiring for the funding backend.
//!
//! Builds the message bus over the configured backend, registers every
//! bounded context's handlers and exposes the thin operational HTTP
//! surface (health and metrics). The business entry points are messages
//! on the bus; route layers for them live outside this core.

pub mod config;
pub mod lnbits;
pub mod routes;
pub mod schema;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use dispatch::{Backend, MessageBus};
use domain::{
    LightningProcessor, register_accounting_handlers, register_bitcoin_handlers,
    register_crowdfunding_handlers,
};

/// Builds the bus with every context's handlers registered.
pub fn build_bus(backend: Backend, lightning: Arc<dyn LightningProcessor>) -> MessageBus {
    let mut bus = MessageBus::new(backend);
    register_accounting_handlers(&mut bus);
    register_crowdfunding_handlers(&mut bus);
    register_bitcoin_handlers(&mut bus, lightning);
    bus
}

/// Creates the Axum application with the operational routes.
pub fn create_app(metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
