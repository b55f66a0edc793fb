//! Job Store
//!
//! Transactional persistence of evaluation jobs. The entity is stored as one
//! JSON blob next to queryable columns; the `status` column is authoritative
//! and overrides the blob's state on read.
//!
//! Writes to an existing row are optimistic: the `version` column must still
//! match what was read, otherwise the whole read-modify-write is retried.
//! Lock contention reported by the engine is retried the same way. Writers
//! of one job are also queued in-process, so callbacks racing on the same
//! job wait for each other instead of colliding in the database.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::AnyPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use evalhub_core::domain::evaluation::{
    EvaluationJobConfig, EvaluationJobResource, EvaluationJobResults, EvaluationJobStatus,
    Resource,
};
use evalhub_core::domain::state::{MessageInfo, OverallState, message_codes};
use evalhub_core::domain::tenant::Tenant;
use evalhub_core::dto::evaluation::StatusEvent;
use evalhub_core::dto::page::QueryResults;

use crate::db::Dialect;
use crate::error::{ServiceError, ServiceResult};
use crate::repository::evaluation::EvaluationRow;
use crate::repository::evaluation_repository;
use crate::service::aggregator;

const KIND: &str = "evaluation job";
const LIST_KIND: &str = "evaluation jobs";

/// Attempts of one read-modify-write before giving up on a contended row
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Pause before retry `n` is `n` times this
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 100;

/// Blob stored in the `entity` column
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntity {
    config: EvaluationJobConfig,
    status: EvaluationJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    results: Option<EvaluationJobResults>,
}

/// Outcome of a mutation closure
enum Change {
    /// Persist the modified job
    Write,
    /// Leave the row untouched
    Skip,
}

/// Result of one read-modify-write attempt
enum Attempt {
    Done(EvaluationJobResource),
    Conflict,
}

/// In-process write queues, one per stripe of job ids
#[derive(Debug)]
struct WriteLocks {
    stripes: Vec<Mutex<()>>,
}

impl WriteLocks {
    fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn for_job(&self, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = hasher.finish() % self.stripes.len() as u64;
        &self.stripes[stripe as usize]
    }
}

/// Evaluation job persistence over a shared connection pool
#[derive(Debug, Clone)]
pub struct EvaluationStore {
    pool: AnyPool,
    dialect: Dialect,
    locks: Arc<WriteLocks>,
}

impl EvaluationStore {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            locks: Arc::new(WriteLocks::new(dialect.concurrent_writers())),
        }
    }

    /// Persist a new job in `pending` state
    pub async fn create(
        &self,
        tenant: &Tenant,
        config: EvaluationJobConfig,
        experiment_id: Option<String>,
    ) -> ServiceResult<EvaluationJobResource> {
        let now = Utc::now();
        let job = EvaluationJobResource {
            resource: Resource {
                id: Uuid::new_v4().to_string(),
                tenant: tenant.clone(),
                created_at: now,
                updated_at: now,
                experiment_id,
            },
            config,
            status: EvaluationJobStatus::pending(MessageInfo::new(
                "Evaluation job created",
                message_codes::EVALUATION_JOB_CREATED,
            )),
            results: None,
        };

        let row = to_row(&job, 1)?;
        let id = job.id().to_string();
        let db_err = |source| ServiceError::DatabaseOperationFailed {
            kind: KIND,
            id: id.clone(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        evaluation_repository::insert(&mut *tx, self.dialect, &row)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        tracing::info!(job_id = %job.id(), tenant = %tenant, "Evaluation job created");
        Ok(job)
    }

    pub async fn get(&self, tenant: &Tenant, id: &str) -> ServiceResult<EvaluationJobResource> {
        tracing::debug!(job_id = %id, "Getting evaluation job");

        let row = evaluation_repository::find_by_id(&self.pool, self.dialect, tenant.as_str(), id)
            .await
            .map_err(|source| ServiceError::DatabaseOperationFailed {
                kind: KIND,
                id: id.to_string(),
                source,
            })?
            .ok_or_else(|| ServiceError::not_found(KIND, id))?;

        from_row(row)
    }

    /// One page of jobs, newest first
    ///
    /// Rows that cannot be decoded are left out of `items`, subtracted from
    /// `total_stored` and described in `errors`.
    pub async fn list(
        &self,
        tenant: &Tenant,
        limit: i64,
        offset: i64,
        status: Option<OverallState>,
    ) -> ServiceResult<QueryResults<EvaluationJobResource>> {
        validate_page(limit, offset)?;
        let status = status.map(OverallState::as_str);
        let query_err = |source| ServiceError::QueryFailed {
            kind: LIST_KIND,
            source,
        };

        let mut tx = self.pool.begin().await.map_err(query_err)?;
        let mut total =
            evaluation_repository::count(&mut *tx, self.dialect, tenant.as_str(), status)
                .await
                .map_err(query_err)?;
        let rows = evaluation_repository::list(
            &mut *tx,
            self.dialect,
            tenant.as_str(),
            status,
            limit,
            offset,
        )
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(query_err)?;

        let mut items = Vec::with_capacity(rows.len());
        let mut errors = Vec::new();
        for row in rows {
            let id = row.id.clone();
            match from_row(row) {
                Ok(job) => items.push(job),
                Err(e) => {
                    tracing::warn!(
                        job_id = %id,
                        error = %e,
                        "Skipping undecodable evaluation job"
                    );
                    errors.push(format!("evaluation job {}: {}", id, e));
                    total -= 1;
                }
            }
        }

        Ok(QueryResults {
            items,
            total_stored: total,
            errors,
        })
    }

    /// Cancel a job. Cancelling a cancelled job is a no-op.
    pub async fn soft_delete(
        &self,
        tenant: &Tenant,
        id: &str,
    ) -> ServiceResult<EvaluationJobResource> {
        let job = self
            .modify(tenant, id, |job| {
                if job.state() == OverallState::Cancelled {
                    return Ok(Change::Skip);
                }
                ensure_mutable(job)?;
                job.status.state = OverallState::Cancelled;
                job.status.message = Some(MessageInfo::new(
                    "Evaluation job is cancelled",
                    message_codes::EVALUATION_JOB_CANCELLED,
                ));
                Ok(Change::Write)
            })
            .await?;

        tracing::info!(job_id = %id, "Evaluation job cancelled");
        Ok(job)
    }

    /// Remove the row. A second call for the same id is NotFound.
    pub async fn hard_delete(&self, tenant: &Tenant, id: &str) -> ServiceResult<()> {
        let db_err = |source| ServiceError::DatabaseOperationFailed {
            kind: KIND,
            id: id.to_string(),
            source,
        };

        let _queued = self.locks.for_job(id).lock().await;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        evaluation_repository::find_by_id(&mut *tx, self.dialect, tenant.as_str(), id)
            .await
            .map_err(db_err)?
            .ok_or_else(|| ServiceError::not_found(KIND, id))?;

        if !evaluation_repository::delete(&mut *tx, self.dialect, tenant.as_str(), id)
            .await
            .map_err(db_err)?
        {
            return Err(ServiceError::not_found(KIND, id));
        }
        tx.commit().await.map_err(db_err)?;

        tracing::info!(job_id = %id, "Evaluation job deleted");
        Ok(())
    }

    /// Administrative override of the overall state
    ///
    /// A cancelled job stays cancelled; the call is a no-op.
    pub async fn set_status(
        &self,
        tenant: &Tenant,
        id: &str,
        state: OverallState,
        message: Option<MessageInfo>,
    ) -> ServiceResult<EvaluationJobResource> {
        let job = self
            .modify(tenant, id, |job| {
                if job.state() == OverallState::Cancelled {
                    return Ok(Change::Skip);
                }
                ensure_mutable(job)?;
                job.status.state = state;
                job.status.message = message.clone();
                Ok(Change::Write)
            })
            .await?;

        tracing::info!(job_id = %id, state = %job.state(), "Evaluation job status set");
        Ok(job)
    }

    /// Fold a benchmark status event into the job
    ///
    /// Validation, status upsert, result recording and recomputation happen
    /// in one transaction; any failure leaves the row untouched.
    pub async fn apply_status_event(
        &self,
        tenant: &Tenant,
        id: &str,
        event: &StatusEvent,
    ) -> ServiceResult<EvaluationJobResource> {
        let event = &event.benchmark_status_event;

        let job = self
            .modify(tenant, id, |job| {
                aggregator::validate_benchmark_exists(job, &event.id, &event.provider_id)?;
                aggregator::update_benchmark_status(job, event.to_status());
                if event.status.is_terminal() {
                    aggregator::update_benchmark_results(job, event.to_result())?;
                }
                aggregator::recompute_overall_state(job);
                Ok(Change::Write)
            })
            .await?;

        tracing::info!(
            job_id = %id,
            provider_id = %event.provider_id,
            benchmark_id = %event.id,
            benchmark_state = %event.status,
            state = %job.state(),
            "Status event applied"
        );
        Ok(job)
    }

    /// Read-modify-write with optimistic retry
    ///
    /// `change` runs once per attempt against a fresh read of the row.
    async fn modify<F>(
        &self,
        tenant: &Tenant,
        id: &str,
        mut change: F,
    ) -> ServiceResult<EvaluationJobResource>
    where
        F: FnMut(&mut EvaluationJobResource) -> ServiceResult<Change>,
    {
        let _queued = self.locks.for_job(id).lock().await;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.try_modify(tenant, id, &mut change).await {
                Ok(Attempt::Done(job)) => return Ok(job),
                Ok(Attempt::Conflict) => {
                    tracing::debug!(job_id = %id, attempt, "Version conflict, retrying");
                }
                Err(ServiceError::DatabaseOperationFailed { source, .. })
                    if self.dialect.is_write_conflict(&source) =>
                {
                    tracing::debug!(
                        job_id = %id,
                        attempt,
                        error = %source,
                        "Database busy, retrying"
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt < MAX_WRITE_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF * attempt as u32).await;
            }
        }

        tracing::warn!(job_id = %id, "Giving up after repeated write conflicts");
        Err(ServiceError::ConcurrentModification { id: id.to_string() })
    }

    async fn try_modify<F>(
        &self,
        tenant: &Tenant,
        id: &str,
        change: &mut F,
    ) -> ServiceResult<Attempt>
    where
        F: FnMut(&mut EvaluationJobResource) -> ServiceResult<Change>,
    {
        let db_err = |source| ServiceError::DatabaseOperationFailed {
            kind: KIND,
            id: id.to_string(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = evaluation_repository::find_by_id(&mut *tx, self.dialect, tenant.as_str(), id)
            .await
            .map_err(db_err)?
            .ok_or_else(|| ServiceError::not_found(KIND, id))?;
        let version = row.version;
        let mut job = from_row(row)?;

        if let Change::Skip = change(&mut job)? {
            tx.rollback().await.map_err(db_err)?;
            return Ok(Attempt::Done(job));
        }

        job.resource.updated_at = Utc::now();
        let row = to_row(&job, version)?;
        if !evaluation_repository::update_versioned(&mut *tx, self.dialect, &row)
            .await
            .map_err(db_err)?
        {
            tx.rollback().await.map_err(db_err)?;
            return Ok(Attempt::Conflict);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(Attempt::Done(job))
    }
}

/// `completed` and `failed` jobs accept no further state changes
fn ensure_mutable(job: &EvaluationJobResource) -> ServiceResult<()> {
    if job.state().is_terminal() {
        return Err(ServiceError::JobCanNotBeCancelled {
            id: job.id().to_string(),
            state: job.state(),
        });
    }
    Ok(())
}

fn validate_page(limit: i64, offset: i64) -> ServiceResult<()> {
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ServiceError::QueryParameterInvalid {
            name: "limit",
            expected: "integer between 1 and 100",
            value: limit.to_string(),
        });
    }
    if offset < 0 {
        return Err(ServiceError::QueryParameterInvalid {
            name: "offset",
            expected: "non-negative integer",
            value: offset.to_string(),
        });
    }
    Ok(())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    // fixed width so lexical order is chronological order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> ServiceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ServiceError::Internal(format!("invalid timestamp '{}': {}", raw, e)))
}

fn to_row(job: &EvaluationJobResource, version: i64) -> ServiceResult<EvaluationRow> {
    let entity = StoredEntity {
        config: job.config.clone(),
        status: job.status.clone(),
        results: job.results.clone(),
    };
    let entity = serde_json::to_string(&entity).map_err(|source| ServiceError::JsonFailed {
        kind: KIND,
        source,
    })?;

    Ok(EvaluationRow {
        id: job.resource.id.clone(),
        tenant_id: job.resource.tenant.as_str().to_string(),
        status: job.state().as_str().to_string(),
        experiment_id: job.resource.experiment_id.clone(),
        entity,
        created_at: format_timestamp(job.resource.created_at),
        updated_at: format_timestamp(job.resource.updated_at),
        version,
    })
}

fn from_row(row: EvaluationRow) -> ServiceResult<EvaluationJobResource> {
    let entity: StoredEntity =
        serde_json::from_str(&row.entity).map_err(|source| ServiceError::JsonFailed {
            kind: KIND,
            source,
        })?;
    let state: OverallState = row.status.parse().map_err(ServiceError::Internal)?;

    let mut status = entity.status;
    status.state = state;

    Ok(EvaluationJobResource {
        resource: Resource {
            id: row.id,
            tenant: Tenant::new(row.tenant_id),
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            experiment_id: row.experiment_id,
        },
        config: entity.config,
        status,
        results: entity.results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use evalhub_core::domain::evaluation::{BenchmarkConfig, ModelRef};
    use evalhub_core::domain::state::BenchmarkState;
    use evalhub_core::dto::evaluation::BenchmarkStatusEvent;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn store() -> (EvaluationStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("evalhub.db").display());
        let pool = db::create_pool(&url, &db::PoolSettings::default())
            .await
            .unwrap();
        db::run_migrations(&pool, Dialect::Sqlite).await.unwrap();
        (EvaluationStore::new(pool, Dialect::Sqlite), dir)
    }

    fn config(benchmarks: &[(&str, &str)]) -> EvaluationJobConfig {
        EvaluationJobConfig {
            model: ModelRef {
                url: "http://model:8000".to_string(),
                name: "granite".to_string(),
            },
            benchmarks: benchmarks
                .iter()
                .map(|(id, provider)| BenchmarkConfig {
                    id: id.to_string(),
                    provider_id: provider.to_string(),
                    parameters: HashMap::from([("num_fewshot".to_string(), 5.into())]),
                })
                .collect(),
            collection: None,
            experiment: None,
            timeout_minutes: Some(60),
            retry_attempts: Some(1),
        }
    }

    fn event(id: &str, provider: &str, status: BenchmarkState) -> StatusEvent {
        StatusEvent {
            benchmark_status_event: BenchmarkStatusEvent {
                provider_id: provider.to_string(),
                id: id.to_string(),
                status,
                error_message: None,
                started_at: None,
                completed_at: None,
                metrics: HashMap::from([("acc".to_string(), 0.71.into())]),
                artifacts: HashMap::new(),
                external_run_id: None,
                logs_path: None,
            },
        }
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips_config() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let cfg = config(&[("arc_easy", "providerA")]);

        let created = store.create(&tenant, cfg.clone(), None).await.unwrap();
        let fetched = store.get(&tenant, created.id()).await.unwrap();

        assert_eq!(fetched.config, cfg);
        assert_eq!(fetched.state(), OverallState::Pending);
        assert_eq!(fetched.resource.tenant, tenant);
    }

    #[tokio::test]
    async fn test_get_is_scoped_to_tenant() {
        let (store, _dir) = store().await;
        let created = store
            .create(&Tenant::new("team-a"), config(&[("a", "p")]), None)
            .await
            .unwrap();

        let err = store.get(&Tenant::new("team-b"), created.id()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_lifecycle_scenario() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store
            .create(&tenant, config(&[("arc_easy", "providerA")]), None)
            .await
            .unwrap();
        let id = job.id().to_string();

        let job = store
            .apply_status_event(
                &tenant,
                &id,
                &event("arc_easy", "providerA", BenchmarkState::Running),
            )
            .await
            .unwrap();
        assert_eq!(job.state(), OverallState::Running);

        let job = store.soft_delete(&tenant, &id).await.unwrap();
        assert_eq!(job.state(), OverallState::Cancelled);

        let job = store
            .apply_status_event(
                &tenant,
                &id,
                &event("arc_easy", "providerA", BenchmarkState::Completed),
            )
            .await
            .unwrap();
        assert_eq!(job.state(), OverallState::Completed);
        assert_eq!(job.results.as_ref().unwrap().benchmarks.len(), 1);

        let err = store.soft_delete(&tenant, &id).await.unwrap_err();
        assert!(matches!(err, ServiceError::JobCanNotBeCancelled { .. }));

        store.hard_delete(&tenant, &id).await.unwrap();
        assert!(store.get(&tenant, &id).await.unwrap_err().is_not_found());
        assert!(store.hard_delete(&tenant, &id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_soft_delete_of_cancelled_job_does_not_write() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();

        store.soft_delete(&tenant, job.id()).await.unwrap();
        let before = store.get(&tenant, job.id()).await.unwrap();

        let again = store.soft_delete(&tenant, job.id()).await.unwrap();
        assert_eq!(again.state(), OverallState::Cancelled);
        let after = store.get(&tenant, job.id()).await.unwrap();
        assert_eq!(after.resource.updated_at, before.resource.updated_at);
    }

    #[tokio::test]
    async fn test_set_status_rejects_terminal_jobs() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();

        store
            .set_status(&tenant, job.id(), OverallState::Failed, None)
            .await
            .unwrap();

        for target in [OverallState::Running, OverallState::Cancelled, OverallState::Completed] {
            let err = store
                .set_status(&tenant, job.id(), target, None)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::JobCanNotBeCancelled { .. }));
        }
    }

    #[tokio::test]
    async fn test_event_for_unknown_benchmark_is_not_found() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();

        let err = store
            .apply_status_event(&tenant, job.id(), &event("a", "other", BenchmarkState::Running))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_second_terminal_event_rolls_back() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store
            .create(&tenant, config(&[("a", "p"), ("b", "p")]), None)
            .await
            .unwrap();

        store
            .apply_status_event(&tenant, job.id(), &event("a", "p", BenchmarkState::Completed))
            .await
            .unwrap();
        let err = store
            .apply_status_event(&tenant, job.id(), &event("a", "p", BenchmarkState::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));

        let stored = store.get(&tenant, job.id()).await.unwrap();
        assert_eq!(stored.status.benchmarks[0].state, BenchmarkState::Completed);
        assert_eq!(stored.results.unwrap().benchmarks.len(), 1);
    }

    #[tokio::test]
    async fn test_status_column_overrides_blob() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();

        sqlx::query("UPDATE evaluations SET status = 'running' WHERE id = ?1")
            .bind(job.id())
            .execute(&store.pool)
            .await
            .unwrap();

        assert_eq!(
            store.get(&tenant, job.id()).await.unwrap().state(),
            OverallState::Running
        );
    }

    #[tokio::test]
    async fn test_stale_version_is_not_written() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();

        let stale = to_row(&job, 1).unwrap();
        assert!(
            evaluation_repository::update_versioned(&store.pool, Dialect::Sqlite, &stale)
                .await
                .unwrap()
        );
        // version is now 2
        assert!(
            !evaluation_repository::update_versioned(&store.pool, Dialect::Sqlite, &stale)
                .await
                .unwrap()
        );
    }

    /// Makes the database drop any write whose entity mentions `marker`,
    /// which `modify` sees as a lost version race
    async fn drop_writes_mentioning(store: &EvaluationStore, marker: &str) {
        let trigger = format!(
            "CREATE TRIGGER drop_marked_writes BEFORE UPDATE ON evaluations \
             WHEN NEW.entity LIKE '%{marker}%' \
             BEGIN SELECT RAISE(IGNORE); END"
        );
        sqlx::query(&trigger).execute(&store.pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_modify_retries_after_version_conflict() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();
        drop_writes_mentioning(&store, "lost-race").await;

        let mut attempts = 0;
        let updated = store
            .modify(&tenant, job.id(), |job| {
                attempts += 1;
                let text = if attempts < 3 { "lost-race" } else { "won-race" };
                job.status.message = Some(MessageInfo::new(
                    text,
                    message_codes::EVALUATION_JOB_UPDATED,
                ));
                Ok(Change::Write)
            })
            .await
            .unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(updated.status.message.as_ref().unwrap().message, "won-race");
        let stored = store.get(&tenant, job.id()).await.unwrap();
        assert_eq!(stored.status.message.unwrap().message, "won-race");
    }

    #[tokio::test]
    async fn test_modify_gives_up_after_repeated_conflicts() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();
        drop_writes_mentioning(&store, "lost-race").await;

        let mut attempts = 0;
        let err = store
            .modify(&tenant, job.id(), |job| {
                attempts += 1;
                job.status.message = Some(MessageInfo::new(
                    "lost-race",
                    message_codes::EVALUATION_JOB_UPDATED,
                ));
                Ok(Change::Write)
            })
            .await
            .unwrap_err();

        assert_eq!(attempts, MAX_WRITE_ATTEMPTS);
        assert!(matches!(err, ServiceError::ConcurrentModification { .. }));
        assert_eq!(err.code(), "concurrent_modification");
        let stored = store.get(&tenant, job.id()).await.unwrap();
        assert_eq!(
            stored.status.message.unwrap().message_code,
            message_codes::EVALUATION_JOB_CREATED
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_events_are_all_recorded() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let benchmarks = [("b0", "p"), ("b1", "p"), ("b2", "p"), ("b3", "p")];
        let first = store.create(&tenant, config(&benchmarks), None).await.unwrap();
        let second = store.create(&tenant, config(&benchmarks), None).await.unwrap();

        let mut handles = Vec::new();
        for job_id in [first.id(), second.id()] {
            for (benchmark, provider) in benchmarks {
                let store = store.clone();
                let tenant = tenant.clone();
                let job_id = job_id.to_string();
                let event = event(benchmark, provider, BenchmarkState::Running);
                handles.push(tokio::spawn(async move {
                    store.apply_status_event(&tenant, &job_id, &event).await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for job_id in [first.id(), second.id()] {
            let stored = store.get(&tenant, job_id).await.unwrap();
            assert_eq!(stored.state(), OverallState::Running);
            let mut recorded: Vec<_> =
                stored.status.benchmarks.iter().map(|b| b.id.as_str()).collect();
            recorded.sort();
            assert_eq!(recorded, vec!["b0", "b1", "b2", "b3"]);
        }
    }

    #[tokio::test]
    async fn test_set_status_leaves_cancelled_job_alone() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();
        store.soft_delete(&tenant, job.id()).await.unwrap();
        let before = store.get(&tenant, job.id()).await.unwrap();

        let job = store
            .set_status(&tenant, job.id(), OverallState::Running, None)
            .await
            .unwrap();

        assert_eq!(job.state(), OverallState::Cancelled);
        let after = store.get(&tenant, job.id()).await.unwrap();
        assert_eq!(after.state(), OverallState::Cancelled);
        assert_eq!(after.resource.updated_at, before.resource.updated_at);
    }

    #[tokio::test]
    async fn test_list_paginates_newest_first() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();
            ids.push(job.id().to_string());
        }

        let page = store.list(&tenant, 2, 0, None).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.total_stored >= 3);
        assert_eq!(page.items[0].id(), ids[2]);

        let rest = store.list(&tenant, 2, 2, None).await.unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].id(), ids[0]);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let job = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();
        store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();
        store.soft_delete(&tenant, job.id()).await.unwrap();

        let page = store
            .list(&tenant, 10, 0, Some(OverallState::Cancelled))
            .await
            .unwrap();
        assert_eq!(page.total_stored, 1);
        assert_eq!(page.items[0].id(), job.id());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_rows() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();
        let good = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();
        let bad = store.create(&tenant, config(&[("a", "p")]), None).await.unwrap();

        sqlx::query("UPDATE evaluations SET entity = 'not json' WHERE id = ?1")
            .bind(bad.id())
            .execute(&store.pool)
            .await
            .unwrap();

        let page = store.list(&tenant, 10, 0, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id(), good.id());
        assert_eq!(page.total_stored, 1);
        assert_eq!(page.errors.len(), 1);
        assert!(page.errors[0].contains(bad.id()));
    }

    #[tokio::test]
    async fn test_list_rejects_bad_page_parameters() {
        let (store, _dir) = store().await;
        let tenant = Tenant::default();

        for (limit, offset) in [(0, 0), (101, 0), (10, -1)] {
            let err = store.list(&tenant, limit, offset, None).await.unwrap_err();
            assert!(matches!(err, ServiceError::QueryParameterInvalid { .. }));
        }
    }
}
