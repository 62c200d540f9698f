//! Request Service
//!
//! Accepts plain-English infrastructure requests over HTTP, answers
//! immediately, and processes each request in the background: analysis by a
//! text-generation service, template generation, and optional deployment
//! with Terraform and kubectl. Status is available by polling or over a
//! WebSocket push channel.

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod executor;
pub mod handlers;
pub mod intake;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod storage;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use analyzer::{HttpTextGenerator, LlmConfig, LlmError, RequirementAnalyzer, TextGenerator};
pub use cache::{MemoryCache, RedisCache, StatusCache};
pub use config::{Config, StorageBackend};
pub use executor::{CommandDeployer, Deployer, ExecutionResult, ExecutionStatus, ExecutorConfig};
pub use handlers::AppState;
pub use notifier::WebhookNotifier;
pub use orchestrator::{Orchestrator, OrchestratorParts, Submission};
pub use storage::{MemoryStore, RedisStore, RequestStore};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/stats", get(handlers::get_stats_handler))
        .route("/api/requests", post(handlers::submit_handler))
        .route(
            "/api/requests/{id}",
            get(handlers::get_request_handler).delete(handlers::cancel_request_handler),
        )
        .route(
            "/api/requestor/{requestor}/requests",
            get(handlers::get_requestor_requests_handler),
        )
        .route("/api/intake/email", post(handlers::email_intake_handler))
        .route("/ws", get(ws::ws_handler))
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
