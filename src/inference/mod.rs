//! HTTP surface over the model wrapper: one request, one generation call.

pub mod handlers;
pub mod registry;

use crate::config::WebConfig;
use crate::util::net::{bind_listener, shutdown_signal};
use axum::{
    routing::{get, post},
    Router,
};
use registry::ModelRegistry;
use std::io;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct InferenceState {
    pub registry: ModelRegistry,
}

pub fn router(state: Arc<InferenceState>) -> Router {
    Router::new()
        .route("/generate", post(handlers::generate))
        .route("/verify", post(handlers::verify))
        .route("/models", get(handlers::list_models))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serves until Ctrl+C/SIGTERM, then releases every loaded model.
pub async fn run_inference_server(config: &WebConfig, state: Arc<InferenceState>) -> io::Result<()> {
    let listener = bind_listener(&config.host, config.port)?;
    info!("Inference endpoint listening on http://{}", listener.local_addr()?);

    let served = axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    state.registry.shutdown();
    served
}
