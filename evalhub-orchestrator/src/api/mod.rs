//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod evaluation;
pub mod health;
pub mod provider;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderName, Method, header},
    routing::{delete, get, post, put},
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::providers::ProviderCatalogue;
use crate::service::EvaluationStore;
use crate::tracking::ExperimentTracker;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: EvaluationStore,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub tracker: Option<Arc<dyn ExperimentTracker>>,
    pub providers: Arc<ProviderCatalogue>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/api/v1/health", get(health::health_check))
        .route("/api/v1/status", get(health::service_status))
        // Evaluation job endpoints
        .route(
            "/api/v1/evaluations/jobs",
            post(evaluation::create_job).get(evaluation::list_jobs),
        )
        .route(
            "/api/v1/evaluations/jobs/{id}",
            get(evaluation::get_job).delete(evaluation::delete_job),
        )
        .route(
            "/api/v1/evaluations/jobs/{id}/status",
            put(evaluation::set_status),
        )
        .route(
            "/api/v1/evaluations/jobs/{id}/events",
            post(evaluation::post_event),
        )
        .route(
            "/api/v1/evaluations/jobs/{id}/resources",
            delete(evaluation::delete_resources),
        )
        // Provider catalogue
        .route(
            "/api/v1/evaluations/providers",
            get(provider::list_providers),
        )
        .route(
            "/api/v1/evaluations/benchmarks",
            get(provider::list_benchmarks),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Permissive CORS for local development against browser tooling
pub fn local_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-tenant"),
        ])
        .max_age(Duration::from_secs(3600))
}
