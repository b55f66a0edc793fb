//! Provider API Handlers

use axum::{Json, extract::State};
use evalhub_core::domain::provider::{BenchmarkResourceList, ProviderResourceList};

use crate::api::AppState;

/// GET /api/v1/evaluations/providers
/// List the configured providers and their benchmarks
pub async fn list_providers(State(state): State<AppState>) -> Json<ProviderResourceList> {
    Json(state.providers.list())
}

/// GET /api/v1/evaluations/benchmarks
/// Flat list of every provider's benchmarks
pub async fn list_benchmarks(State(state): State<AppState>) -> Json<BenchmarkResourceList> {
    Json(state.providers.benchmarks())
}
