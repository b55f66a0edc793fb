//! Evaluation Service
//!
//! Ties the store, the dispatcher and experiment tracking together for the
//! job lifecycle operations the API exposes.

use evalhub_core::domain::evaluation::{EvaluationJobConfig, EvaluationJobResource};
use evalhub_core::domain::state::{MessageInfo, OverallState, message_codes};
use evalhub_core::domain::tenant::Tenant;
use evalhub_core::dto::evaluation::{SetStatusRequest, StatusEvent};
use evalhub_core::dto::page::QueryResults;

use crate::dispatch::Dispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::service::store::EvaluationStore;
use crate::tracking::{self, ExperimentTracker};

/// Validate, persist and dispatch a new job
///
/// A job whose dispatch fails stays stored, marked `failed`, and the
/// dispatch error is returned.
pub async fn create_job(
    store: &EvaluationStore,
    dispatcher: &dyn Dispatcher,
    tracker: Option<&dyn ExperimentTracker>,
    tenant: &Tenant,
    config: EvaluationJobConfig,
) -> ServiceResult<EvaluationJobResource> {
    config.validate().map_err(ServiceError::ValidationFailed)?;

    let experiment_id = tracking::experiment_id(tracker, config.experiment.as_ref()).await?;
    let job = store.create(tenant, config, experiment_id).await?;

    if let Err(err) = dispatcher.run(&job).await {
        tracing::error!(
            job_id = %job.id(),
            dispatcher = dispatcher.name(),
            error = %err,
            "Evaluation job dispatch failed"
        );
        let message = MessageInfo::new(err.to_string(), message_codes::EVALUATION_JOB_FAILED);
        if let Err(mark_err) = store
            .set_status(tenant, job.id(), OverallState::Failed, Some(message))
            .await
        {
            tracing::warn!(
                job_id = %job.id(),
                error = %mark_err,
                "Failed to mark evaluation job as failed"
            );
        }
        return Err(err);
    }

    Ok(job)
}

pub async fn get_job(
    store: &EvaluationStore,
    tenant: &Tenant,
    id: &str,
) -> ServiceResult<EvaluationJobResource> {
    store.get(tenant, id).await
}

pub async fn list_jobs(
    store: &EvaluationStore,
    tenant: &Tenant,
    limit: i64,
    offset: i64,
    status: Option<OverallState>,
) -> ServiceResult<QueryResults<EvaluationJobResource>> {
    store.list(tenant, limit, offset, status).await
}

/// Cancel the job, or remove its row entirely when `hard_delete` is set
///
/// A hard delete touches persisted state only; cluster resources are torn
/// down separately through [`delete_job_resources`].
pub async fn delete_job(
    store: &EvaluationStore,
    tenant: &Tenant,
    id: &str,
    hard_delete: bool,
) -> ServiceResult<()> {
    if hard_delete {
        store.hard_delete(tenant, id).await
    } else {
        store.soft_delete(tenant, id).await.map(|_| ())
    }
}

/// Tear down the cluster resources dispatched for a stored job
pub async fn delete_job_resources(
    store: &EvaluationStore,
    dispatcher: &dyn Dispatcher,
    tenant: &Tenant,
    id: &str,
) -> ServiceResult<()> {
    let job = store.get(tenant, id).await?;

    dispatcher.delete_resources(&job).await.inspect_err(|err| {
        tracing::warn!(
            job_id = %id,
            dispatcher = dispatcher.name(),
            error = %err,
            "Failed to delete evaluation job resources"
        );
    })?;

    tracing::info!(
        job_id = %id,
        dispatcher = dispatcher.name(),
        "Evaluation job resources deleted"
    );
    Ok(())
}

pub async fn set_status(
    store: &EvaluationStore,
    tenant: &Tenant,
    id: &str,
    request: SetStatusRequest,
) -> ServiceResult<EvaluationJobResource> {
    store
        .set_status(tenant, id, request.state, request.message)
        .await
}

pub async fn apply_status_event(
    store: &EvaluationStore,
    tenant: &Tenant,
    id: &str,
    event: &StatusEvent,
) -> ServiceResult<EvaluationJobResource> {
    store.apply_status_event(tenant, id, event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, Dialect};
    use crate::dispatch::LocalDispatcher;
    use async_trait::async_trait;
    use evalhub_core::domain::evaluation::{BenchmarkConfig, ExperimentConfig, ModelRef};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Dispatcher that fails every run and remembers teardown requests
    #[derive(Default)]
    struct FailingDispatcher {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatcher for FailingDispatcher {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, job: &EvaluationJobResource) -> ServiceResult<()> {
            Err(ServiceError::dispatch(job.id(), "cluster unavailable"))
        }

        async fn delete_resources(&self, job: &EvaluationJobResource) -> ServiceResult<()> {
            self.deleted.lock().unwrap().push(job.id().to_string());
            Err(ServiceError::dispatch(job.id(), "cluster unavailable"))
        }
    }

    struct FixedTracker;

    #[async_trait]
    impl ExperimentTracker for FixedTracker {
        async fn resolve_experiment(
            &self,
            _experiment: &ExperimentConfig,
        ) -> ServiceResult<String> {
            Ok("42".to_string())
        }
    }

    async fn store() -> (EvaluationStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("evalhub.db").display());
        let pool = db::create_pool(&url, &db::PoolSettings::default())
            .await
            .unwrap();
        db::run_migrations(&pool, Dialect::Sqlite).await.unwrap();
        (EvaluationStore::new(pool, Dialect::Sqlite), dir)
    }

    fn config() -> EvaluationJobConfig {
        EvaluationJobConfig {
            model: ModelRef {
                url: "http://model:8000".to_string(),
                name: "granite".to_string(),
            },
            benchmarks: vec![BenchmarkConfig {
                id: "arc_easy".to_string(),
                provider_id: "lm_evaluation_harness".to_string(),
                parameters: HashMap::new(),
            }],
            collection: None,
            experiment: None,
            timeout_minutes: None,
            retry_attempts: None,
        }
    }

    #[tokio::test]
    async fn test_create_job_with_local_dispatcher_stays_pending() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();

        let job = create_job(&store, &LocalDispatcher, None, &tenant, config())
            .await
            .unwrap();

        let stored = store.get(&tenant, job.id()).await.unwrap();
        assert_eq!(stored.state(), OverallState::Pending);
    }

    #[tokio::test]
    async fn test_create_job_rejects_invalid_config() {
        let (store, _dir) = store().await;
        let mut config = config();
        config.benchmarks.clear();

        let err = create_job(&store, &LocalDispatcher, None, &Tenant::default(), config)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "request_validation_failed");

        let page = store.list(&Tenant::default(), 10, 0, None).await.unwrap();
        assert_eq!(page.total_stored, 0);
    }

    #[tokio::test]
    async fn test_failed_dispatch_marks_job_failed() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let dispatcher = FailingDispatcher::default();

        let err = create_job(&store, &dispatcher, None, &tenant, config())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "evaluation_job_dispatch_failed");

        let page = store.list(&tenant, 10, 0, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        let job = &page.items[0];
        assert_eq!(job.state(), OverallState::Failed);
        assert_eq!(
            job.status.message.as_ref().unwrap().message_code,
            message_codes::EVALUATION_JOB_FAILED
        );
    }

    #[tokio::test]
    async fn test_experiment_requires_tracker() {
        let (store, _dir) = store().await;
        let mut config = config();
        config.experiment = Some(ExperimentConfig {
            name: "nightly".to_string(),
            tags: BTreeMap::new(),
            artifact_location: None,
        });

        let err = create_job(&store, &LocalDispatcher, None, &Tenant::default(), config.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "mlflow_required_for_experiment");

        let job = create_job(
            &store,
            &LocalDispatcher,
            Some(&FixedTracker),
            &Tenant::default(),
            config,
        )
        .await
        .unwrap();
        assert_eq!(job.resource.experiment_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_row() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = create_job(&store, &LocalDispatcher, None, &tenant, config())
            .await
            .unwrap();

        delete_job(&store, &tenant, job.id(), false).await.unwrap();

        let stored = get_job(&store, &tenant, job.id()).await.unwrap();
        assert_eq!(stored.state(), OverallState::Cancelled);
    }

    #[tokio::test]
    async fn test_hard_delete_removes_row_only() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = create_job(&store, &LocalDispatcher, None, &tenant, config())
            .await
            .unwrap();

        delete_job(&store, &tenant, job.id(), true).await.unwrap();

        let err = get_job(&store, &tenant, job.id()).await.unwrap_err();
        assert!(err.is_not_found());
        let err = delete_job(&store, &tenant, job.id(), true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_job_resources_reports_teardown_failure() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = create_job(&store, &LocalDispatcher, None, &tenant, config())
            .await
            .unwrap();
        let dispatcher = FailingDispatcher::default();

        let err = delete_job_resources(&store, &dispatcher, &tenant, job.id())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "evaluation_job_dispatch_failed");
        assert_eq!(*dispatcher.deleted.lock().unwrap(), vec![job.id().to_string()]);

        // the row is left alone
        let stored = get_job(&store, &tenant, job.id()).await.unwrap();
        assert_eq!(stored.state(), OverallState::Pending);
    }

    #[tokio::test]
    async fn test_delete_job_resources_of_unknown_job_is_not_found() {
        let (store, _dir) = store().await;
        let dispatcher = FailingDispatcher::default();

        let err = delete_job_resources(&store, &dispatcher, &Tenant::default(), "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(dispatcher.deleted.lock().unwrap().is_empty());
    }
}
