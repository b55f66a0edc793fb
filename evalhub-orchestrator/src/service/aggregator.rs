//! Status Aggregator
//!
//! Folds benchmark-level statuses into the job's overall state. Nothing in
//! here touches storage; the store calls these on an in-memory copy of the
//! job inside its transaction.

use evalhub_core::domain::evaluation::{
    BenchmarkResult, BenchmarkStatus, EvaluationJobResource, EvaluationJobResults,
};
use evalhub_core::domain::state::{BenchmarkState, MessageInfo, OverallState, message_codes};

use crate::error::{ServiceError, ServiceResult};

/// Overall state and message for `benchmarks` out of `total` configured ones.
///
/// Order-independent: failure lines are sorted by `(id, provider_id)`.
pub fn aggregate(benchmarks: &[BenchmarkStatus], total: usize) -> (OverallState, MessageInfo) {
    let count = |state: BenchmarkState| benchmarks.iter().filter(|b| b.state == state).count();
    let completed = count(BenchmarkState::Completed);
    let failed = count(BenchmarkState::Failed);
    let running = count(BenchmarkState::Running);

    let (state, message) = if completed == total {
        (OverallState::Completed, "Evaluation job is completed".to_string())
    } else if failed == total {
        (
            OverallState::Failed,
            format!("Evaluation job is failed. \n{}", failure_lines(benchmarks)),
        )
    } else if completed + failed == total {
        (
            OverallState::PartiallyFailed,
            format!("Some of the benchmarks failed. \n{}", failure_lines(benchmarks)),
        )
    } else if running > 0 {
        (OverallState::Running, "Evaluation job is running".to_string())
    } else {
        (OverallState::Pending, "Evaluation job is pending".to_string())
    };

    (
        state,
        MessageInfo::new(message, message_codes::EVALUATION_JOB_UPDATED),
    )
}

fn failure_lines(benchmarks: &[BenchmarkStatus]) -> String {
    let mut failed: Vec<&BenchmarkStatus> = benchmarks
        .iter()
        .filter(|b| b.state == BenchmarkState::Failed)
        .collect();
    failed.sort_by(|a, b| (&a.id, &a.provider_id).cmp(&(&b.id, &b.provider_id)));

    failed
        .into_iter()
        .filter_map(|b| {
            b.error_message
                .as_ref()
                .map(|m| format!("Benchmark {} failed with message: {}\n", b.id, m.message))
        })
        .collect()
}

/// Rejects `(id, provider_id)` pairs that are not configured on the job
pub fn validate_benchmark_exists(
    job: &EvaluationJobResource,
    id: &str,
    provider_id: &str,
) -> ServiceResult<()> {
    if job.config.contains_benchmark(id, provider_id) {
        Ok(())
    } else {
        Err(ServiceError::not_found("benchmark", id))
    }
}

/// Upsert by `(id, provider_id)`
pub fn update_benchmark_status(job: &mut EvaluationJobResource, status: BenchmarkStatus) {
    let benchmarks = &mut job.status.benchmarks;
    match benchmarks
        .iter_mut()
        .find(|b| b.id == status.id && b.provider_id == status.provider_id)
    {
        Some(existing) => *existing = status,
        None => benchmarks.push(status),
    }
}

/// Record a benchmark's final result; a result is written at most once
pub fn update_benchmark_results(
    job: &mut EvaluationJobResource,
    result: BenchmarkResult,
) -> ServiceResult<()> {
    let job_id = job.resource.id.clone();
    let results = job.results.get_or_insert_with(EvaluationJobResults::default);

    if results
        .benchmarks
        .iter()
        .any(|b| b.id == result.id && b.provider_id == result.provider_id)
    {
        return Err(ServiceError::Internal(format!(
            "Benchmark result already exists for benchmark {} in job {}",
            result.id, job_id
        )));
    }

    results.benchmarks.push(result);
    Ok(())
}

/// Overwrite the job's state and message from its benchmark statuses
pub fn recompute_overall_state(job: &mut EvaluationJobResource) {
    let (state, message) = aggregate(&job.status.benchmarks, job.config.benchmarks.len());
    job.status.state = state;
    job.status.message = Some(message);
}
