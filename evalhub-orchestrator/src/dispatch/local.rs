use async_trait::async_trait;
use evalhub_core::domain::evaluation::EvaluationJobResource;

use super::Dispatcher;
use crate::error::ServiceResult;

/// Accepts jobs without running them
///
/// Used when the service runs outside a cluster. Jobs stay pending until
/// status events arrive from elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDispatcher;

#[async_trait]
impl Dispatcher for LocalDispatcher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, job: &EvaluationJobResource) -> ServiceResult<()> {
        tracing::info!(job_id = %job.id(), "Local mode, evaluation job not dispatched");
        Ok(())
    }

    async fn delete_resources(&self, _job: &EvaluationJobResource) -> ServiceResult<()> {
        Ok(())
    }
}
