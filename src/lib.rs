pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod signature;
pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing};
use std::sync::Arc;
use tokio::sync::Mutex;

use config::WebhookConfig;
use logging::EventLog;
use pipeline::Pipeline;

pub struct AppState {
    pub config: WebhookConfig,
    pub pipeline: Pipeline,
    pub event_log: Arc<dyn EventLog>,
    /// Held for the whole of a deployment run
    pub deploy_lock: Mutex<()>,
}

impl AppState {
    pub fn new(config: WebhookConfig, pipeline: Pipeline, event_log: Arc<dyn EventLog>) -> Self {
        Self {
            config,
            pipeline,
            event_log,
            deploy_lock: Mutex::new(()),
        }
    }
}

pub type SharedState = Arc<AppState>;

/// Routes for the webhook service. Anything unmatched, including other
/// methods on known paths and the HEAD axum would derive from GET, answers 404.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/health",
            routing::get(api::health)
                .head(api::not_found)
                .fallback(api::not_found),
        )
        .route(
            "/webhook",
            routing::get(api::webhook_info)
                .head(api::not_found)
                .post(api::handle_webhook)
                .fallback(api::not_found),
        )
        .fallback(api::not_found)
        // Payloads are read whole before verification, with no size cap
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
