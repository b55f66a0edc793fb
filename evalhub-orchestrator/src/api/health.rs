//! Health and Status Handlers

use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

/// GET /api/v1/health
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

/// GET /api/v1/status
pub async fn service_status() -> Json<Value> {
    Json(json!({
        "service": "eval-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}
