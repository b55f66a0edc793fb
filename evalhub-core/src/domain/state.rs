//! Lifecycle states for evaluation jobs and their benchmarks

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Machine-readable codes attached to status messages.
pub mod message_codes {
    pub const EVALUATION_JOB_CREATED: &str = "evaluation_job_created";
    pub const EVALUATION_JOB_CANCELLED: &str = "evaluation_job_cancelled";
    pub const EVALUATION_JOB_FAILED: &str = "evaluation_job_failed";
    pub const EVALUATION_JOB_UPDATED: &str = "evaluation_job_updated";
}

/// Overall state of an evaluation job, derived from its benchmarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    PartiallyFailed,
}

impl OverallState {
    /// `completed` and `failed` reject any further state mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, OverallState::Completed | OverallState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OverallState::Pending => "pending",
            OverallState::Running => "running",
            OverallState::Completed => "completed",
            OverallState::Failed => "failed",
            OverallState::Cancelled => "cancelled",
            OverallState::PartiallyFailed => "partially_failed",
        }
    }
}

impl std::fmt::Display for OverallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OverallState::Pending),
            "running" => Ok(OverallState::Running),
            "completed" => Ok(OverallState::Completed),
            "failed" => Ok(OverallState::Failed),
            "cancelled" => Ok(OverallState::Cancelled),
            "partially_failed" => Ok(OverallState::PartiallyFailed),
            other => Err(format!("unknown overall state '{}'", other)),
        }
    }
}

/// State of a single benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BenchmarkState {
    /// A terminal benchmark state produces a (write-once) result.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BenchmarkState::Completed | BenchmarkState::Failed | BenchmarkState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BenchmarkState::Pending => "pending",
            BenchmarkState::Running => "running",
            BenchmarkState::Completed => "completed",
            BenchmarkState::Failed => "failed",
            BenchmarkState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BenchmarkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable message paired with a stable code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub message: String,
    pub message_code: String,
}

impl MessageInfo {
    pub fn new(message: impl Into<String>, message_code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            message_code: message_code.into(),
        }
    }
}
