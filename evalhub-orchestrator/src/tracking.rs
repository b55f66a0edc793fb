//! Experiment tracking
//!
//! Maps a named experiment to a tracking-server identifier. The only
//! implementation talks to the MLflow REST API.

use async_trait::async_trait;
use evalhub_kube::Timeouts;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use evalhub_core::domain::evaluation::ExperimentConfig;

use crate::error::{ServiceError, ServiceResult};

#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Id of the active experiment called `experiment.name`, created if needed
    async fn resolve_experiment(&self, experiment: &ExperimentConfig) -> ServiceResult<String>;
}

/// Resolve the experiment id for a job, if it names one
pub async fn experiment_id(
    tracker: Option<&dyn ExperimentTracker>,
    experiment: Option<&ExperimentConfig>,
) -> ServiceResult<Option<String>> {
    let Some(experiment) = experiment else {
        return Ok(None);
    };
    let tracker = tracker.ok_or(ServiceError::ExperimentTrackingRequired)?;
    tracker.resolve_experiment(experiment).await.map(Some)
}

#[derive(Debug, Clone)]
pub struct MlflowTracker {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
    #[serde(default)]
    lifecycle_stage: String,
}

#[derive(Debug, Serialize)]
struct CreateExperimentRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_location: Option<&'a str>,
    tags: Vec<ExperimentTag<'a>>,
}

#[derive(Debug, Serialize)]
struct ExperimentTag<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

impl MlflowTracker {
    pub fn new(base_url: impl Into<String>, timeouts: Timeouts) -> reqwest::Result<Self> {
        let client = timeouts.apply(Client::builder()).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn find_active(&self, name: &str) -> ServiceResult<Option<String>> {
        let url = format!("{}/api/2.0/mlflow/experiments/get-by-name", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("experiment_name", name)])
            .send()
            .await
            .map_err(request_failed)?;

        // MLflow answers RESOURCE_DOES_NOT_EXIST with a 404
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: GetExperimentResponse = json_body(response).await?;

        let experiment = body.experiment;
        if experiment.lifecycle_stage == "active" && !experiment.experiment_id.is_empty() {
            Ok(Some(experiment.experiment_id))
        } else {
            Ok(None)
        }
    }

    async fn create(&self, experiment: &ExperimentConfig) -> ServiceResult<String> {
        let url = format!("{}/api/2.0/mlflow/experiments/create", self.base_url);
        let request = CreateExperimentRequest {
            name: &experiment.name,
            artifact_location: experiment.artifact_location.as_deref(),
            tags: experiment
                .tags
                .iter()
                .map(|(key, value)| ExperimentTag {
                    key: key.as_str(),
                    value: value.as_str(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(request_failed)?;
        let body: CreateExperimentResponse = json_body(response).await?;

        tracing::info!(
            experiment = %experiment.name,
            experiment_id = %body.experiment_id,
            "MLflow experiment created"
        );
        Ok(body.experiment_id)
    }
}

#[async_trait]
impl ExperimentTracker for MlflowTracker {
    async fn resolve_experiment(&self, experiment: &ExperimentConfig) -> ServiceResult<String> {
        if let Some(id) = self.find_active(&experiment.name).await? {
            tracing::debug!(
                experiment = %experiment.name,
                experiment_id = %id,
                "Reusing MLflow experiment"
            );
            return Ok(id);
        }
        self.create(experiment).await
    }
}

fn request_failed(err: reqwest::Error) -> ServiceError {
    ServiceError::ExperimentTrackingFailed(err.to_string())
}

async fn json_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> ServiceResult<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ServiceError::ExperimentTrackingFailed(format!(
            "status {}: {}",
            status.as_u16(),
            text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| ServiceError::ExperimentTrackingFailed(format!("invalid response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct FixedTracker;

    #[async_trait]
    impl ExperimentTracker for FixedTracker {
        async fn resolve_experiment(&self, experiment: &ExperimentConfig) -> ServiceResult<String> {
            Ok(format!("exp-{}", experiment.name))
        }
    }

    fn experiment() -> ExperimentConfig {
        ExperimentConfig {
            name: "nightly".to_string(),
            tags: BTreeMap::from([("team".to_string(), "evals".to_string())]),
            artifact_location: None,
        }
    }

    #[tokio::test]
    async fn test_no_experiment_needs_no_tracker() {
        assert_eq!(experiment_id(None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_experiment_without_tracker_is_rejected() {
        let err = experiment_id(None, Some(&experiment())).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExperimentTrackingRequired));
    }

    #[tokio::test]
    async fn test_experiment_is_resolved() {
        let tracker = FixedTracker;
        let id = experiment_id(Some(&tracker), Some(&experiment()))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("exp-nightly"));
    }

    #[test]
    fn test_create_request_shape() {
        let exp = experiment();
        let request = CreateExperimentRequest {
            name: &exp.name,
            artifact_location: None,
            tags: exp
                .tags
                .iter()
                .map(|(key, value)| ExperimentTag {
                    key: key.as_str(),
                    value: value.as_str(),
                })
                .collect(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tags"][0]["key"], "team");
        assert!(json.get("artifact_location").is_none());
    }

    #[test]
    fn test_tracker_trims_trailing_slash() {
        assert_eq!(
            MlflowTracker::new("http://mlflow:5000/", Timeouts::default())
                .unwrap()
                .base_url(),
            "http://mlflow:5000"
        );
    }

    #[tokio::test]
    async fn test_stalled_tracking_server_fails_the_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeouts = Timeouts {
            request: Duration::from_millis(200),
            connect: Duration::from_millis(200),
        };
        let tracker = MlflowTracker::new(format!("http://{addr}"), timeouts).unwrap();

        let err = tracker.resolve_experiment(&experiment()).await.unwrap_err();
        assert_eq!(err.code(), "mlflow_request_failed");

        server.abort();
    }
}
