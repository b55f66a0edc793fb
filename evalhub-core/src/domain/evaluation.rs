//! Evaluation job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::state::{BenchmarkState, MessageInfo, OverallState};
use super::tenant::Tenant;

/// Model under evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub url: String,
    pub name: String,
}

/// One benchmark to run, identified by `(id, provider_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub id: String,
    pub provider_id: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl BenchmarkConfig {
    pub fn matches(&self, id: &str, provider_id: &str) -> bool {
        self.id == id && self.provider_id == provider_id
    }
}

/// Reference to a stored benchmark collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub id: String,
}

/// Experiment-tracking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
}

/// Evaluation job request, immutable once the job is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJobConfig {
    pub model: ModelRef,
    pub benchmarks: Vec<BenchmarkConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<CollectionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<i32>,
}

impl EvaluationJobConfig {
    /// Checks the request for missing or inconsistent fields.
    ///
    /// Returns every problem found, joined into one message.
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();

        if self.model.url.trim().is_empty() {
            problems.push("model.url is required".to_string());
        }
        if self.model.name.trim().is_empty() {
            problems.push("model.name is required".to_string());
        }
        if self.benchmarks.is_empty() {
            problems.push("at least one benchmark is required".to_string());
        }

        let mut seen = HashSet::new();
        for (index, benchmark) in self.benchmarks.iter().enumerate() {
            if benchmark.id.trim().is_empty() {
                problems.push(format!("benchmarks[{}].id is required", index));
            }
            if benchmark.provider_id.trim().is_empty() {
                problems.push(format!("benchmarks[{}].provider_id is required", index));
            }
            if !seen.insert((benchmark.id.as_str(), benchmark.provider_id.as_str())) {
                problems.push(format!(
                    "benchmark {} for provider {} is listed more than once",
                    benchmark.id, benchmark.provider_id
                ));
            }
        }

        if let Some(experiment) = &self.experiment {
            if experiment.name.trim().is_empty() {
                problems.push("experiment.name is required".to_string());
            }
        }
        if matches!(self.timeout_minutes, Some(t) if t <= 0) {
            problems.push("timeout_minutes must be positive".to_string());
        }
        if matches!(self.retry_attempts, Some(r) if r < 0) {
            problems.push("retry_attempts cannot be negative".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// Whether `(id, provider_id)` is one of the configured benchmarks
    pub fn contains_benchmark(&self, id: &str, provider_id: &str) -> bool {
        self.benchmarks.iter().any(|b| b.matches(id, provider_id))
    }
}

/// Status of one benchmark, upserted as events arrive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStatus {
    pub provider_id: String,
    pub id: String,
    pub state: BenchmarkState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<MessageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_run_id: Option<String>,
}

/// Job-level status: overall state plus per-benchmark detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJobStatus {
    pub state: OverallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageInfo>,
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkStatus>,
}

impl EvaluationJobStatus {
    pub fn pending(message: MessageInfo) -> Self {
        Self {
            state: OverallState::Pending,
            message: Some(message),
            benchmarks: Vec::new(),
        }
    }
}

/// Final output of one benchmark, written once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub id: String,
    pub provider_id: String,
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub artifacts: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJobResults {
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkResult>,
}

/// Identity and bookkeeping shared by stored resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub tenant: Tenant,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
}

/// The evaluation job aggregate: identity, config, status and results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJobResource {
    pub resource: Resource,
    pub config: EvaluationJobConfig,
    pub status: EvaluationJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<EvaluationJobResults>,
}

impl EvaluationJobResource {
    pub fn id(&self) -> &str {
        &self.resource.id
    }

    pub fn state(&self) -> OverallState {
        self.status.state
    }
}
