//! Evaluation job DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::evaluation::{BenchmarkResult, BenchmarkStatus};
use crate::domain::state::{BenchmarkState, MessageInfo, OverallState};

/// Callback sent by an execution unit when its benchmark changes state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub benchmark_status_event: BenchmarkStatusEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStatusEvent {
    pub provider_id: String,
    pub id: String,
    pub status: BenchmarkState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<MessageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub artifacts: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_path: Option<String>,
}

impl BenchmarkStatusEvent {
    /// Status portion of the event
    pub fn to_status(&self) -> BenchmarkStatus {
        BenchmarkStatus {
            provider_id: self.provider_id.clone(),
            id: self.id.clone(),
            state: self.status,
            error_message: self.error_message.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            external_run_id: self.external_run_id.clone(),
        }
    }

    /// Result portion of the event, meaningful once the state is terminal
    pub fn to_result(&self) -> BenchmarkResult {
        BenchmarkResult {
            id: self.id.clone(),
            provider_id: self.provider_id.clone(),
            metrics: self.metrics.clone(),
            artifacts: self.artifacts.clone(),
            external_run_id: self.external_run_id.clone(),
            logs_path: self.logs_path.clone(),
        }
    }
}

/// Administrative override of a job's overall state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStatusRequest {
    pub state: OverallState,
    #[serde(default)]
    pub message: Option<MessageInfo>,
}
