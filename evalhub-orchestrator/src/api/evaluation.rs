//! Evaluation Job API Handlers
//!
//! HTTP endpoints for the evaluation job lifecycle and the callbacks
//! execution units send while they run.

use std::convert::Infallible;

use axum::{
    Json,
    extract::{FromRequestParts, Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
};
use evalhub_core::domain::evaluation::{EvaluationJobConfig, EvaluationJobResource};
use evalhub_core::domain::state::OverallState;
use evalhub_core::domain::tenant::Tenant;
use evalhub_core::dto::evaluation::{SetStatusRequest, StatusEvent};
use evalhub_core::dto::page::{EvaluationJobResourceList, HRef, Page};
use serde::Deserialize;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::error::ServiceError;
use crate::service::evaluation_service;
use crate::service::store::DEFAULT_LIMIT;

pub const JOBS_PATH: &str = "/api/v1/evaluations/jobs";
pub const TENANT_HEADER: &str = "x-tenant";

/// Tenant named by the `X-Tenant` header, `default` when absent or blank
#[derive(Debug, Clone)]
pub struct RequestTenant(pub Tenant);

impl<S> FromRequestParts<S> for RequestTenant
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Tenant::new)
            .unwrap_or_default();
        Ok(Self(tenant))
    }
}

/// Raw query strings, parsed by hand so bad values get a precise error
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    pub hard_delete: Option<String>,
}

fn parse_i64(name: &'static str, value: Option<&str>, default: i64) -> ApiResult<i64> {
    match value {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ServiceError::QueryParameterInvalid {
                name,
                expected: "integer",
                value: raw.to_string(),
            }),
    }
}

fn parse_bool(name: &'static str, value: Option<&str>) -> ApiResult<bool> {
    match value {
        None | Some("") => Ok(false),
        Some(raw) => raw
            .parse()
            .map_err(|_| ServiceError::QueryParameterInvalid {
                name,
                expected: "boolean",
                value: raw.to_string(),
            }),
    }
}

fn parse_status(value: Option<&str>) -> ApiResult<Option<OverallState>> {
    match value {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ServiceError::QueryParameterInvalid {
                name: "status",
                expected: "evaluation job state",
                value: raw.to_string(),
            }),
    }
}

fn page_href(limit: i64, offset: i64, status: Option<OverallState>) -> HRef {
    let mut href = format!("{}?limit={}&offset={}", JOBS_PATH, limit, offset);
    if let Some(status) = status {
        href.push_str("&status=");
        href.push_str(status.as_str());
    }
    HRef { href }
}

/// Offset of the following page, if any rows remain past this one
fn next_offset(limit: i64, offset: i64, total_count: i64) -> Option<i64> {
    offset
        .checked_add(limit)
        .filter(|next| *next < total_count)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ServiceError::ValidationFailed(rejection.body_text()))
}

/// POST /api/v1/evaluations/jobs
/// Create an evaluation job and dispatch it
pub async fn create_job(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    payload: Result<Json<EvaluationJobConfig>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EvaluationJobResource>)> {
    let config = json_body(payload)?;
    tracing::info!(tenant = %tenant, model = %config.model.name, "Creating evaluation job");

    let job = evaluation_service::create_job(
        &state.store,
        state.dispatcher.as_ref(),
        state.tracker.as_deref(),
        &tenant,
        config,
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/evaluations/jobs
/// One page of jobs, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<EvaluationJobResourceList>> {
    let limit = parse_i64("limit", params.limit.as_deref(), DEFAULT_LIMIT)?;
    let offset = parse_i64("offset", params.offset.as_deref(), 0)?;
    let status = parse_status(params.status.as_deref())?;

    let results =
        evaluation_service::list_jobs(&state.store, &tenant, limit, offset, status).await?;

    let total_count = results.total_stored;
    let next = next_offset(limit, offset, total_count).map(|next| page_href(limit, next, status));

    Ok(Json(EvaluationJobResourceList {
        page: Page {
            first: page_href(limit, 0, status),
            next,
            limit,
            total_count,
        },
        items: results.items,
        errors: results.errors,
    }))
}

/// GET /api/v1/evaluations/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    Path(id): Path<String>,
) -> ApiResult<Json<EvaluationJobResource>> {
    let job = evaluation_service::get_job(&state.store, &tenant, &id).await?;
    Ok(Json(job))
}

/// DELETE /api/v1/evaluations/jobs/{id}
/// Cancel the job, or remove it with `?hard_delete=true`
pub async fn delete_job(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<StatusCode> {
    let hard_delete = parse_bool("hard_delete", params.hard_delete.as_deref())?;
    tracing::info!(job_id = %id, hard_delete, "Deleting evaluation job");

    evaluation_service::delete_job(&state.store, &tenant, &id, hard_delete).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/evaluations/jobs/{id}/resources
/// Tear down the cluster resources dispatched for the job
pub async fn delete_resources(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!(job_id = %id, "Deleting evaluation job resources");

    evaluation_service::delete_job_resources(
        &state.store,
        state.dispatcher.as_ref(),
        &tenant,
        &id,
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/evaluations/jobs/{id}/status
/// Administrative override of the overall state
pub async fn set_status(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    Path(id): Path<String>,
    payload: Result<Json<SetStatusRequest>, JsonRejection>,
) -> ApiResult<Json<EvaluationJobResource>> {
    let request = json_body(payload)?;
    let job = evaluation_service::set_status(&state.store, &tenant, &id, request).await?;
    Ok(Json(job))
}

/// POST /api/v1/evaluations/jobs/{id}/events
/// Benchmark status callback from an execution unit
pub async fn post_event(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    Path(id): Path<String>,
    payload: Result<Json<StatusEvent>, JsonRejection>,
) -> ApiResult<Json<EvaluationJobResource>> {
    let event = json_body(payload)?;
    let job = evaluation_service::apply_status_event(&state.store, &tenant, &id, &event).await?;
    Ok(Json(job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_i64() {
        assert_eq!(parse_i64("limit", None, 50).unwrap(), 50);
        assert_eq!(parse_i64("limit", Some("20"), 50).unwrap(), 20);
        let err = parse_i64("limit", Some("ten"), 50).unwrap_err();
        assert_eq!(err.code(), "query_parameter_invalid");
    }

    #[test]
    fn test_parse_bool() {
        assert!(!parse_bool("hard_delete", None).unwrap());
        assert!(parse_bool("hard_delete", Some("true")).unwrap());
        assert!(parse_bool("hard_delete", Some("yes")).is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(Some("running")).unwrap(), Some(OverallState::Running));
        assert!(parse_status(Some("sleeping")).is_err());
    }

    #[test]
    fn test_next_offset() {
        assert_eq!(next_offset(10, 0, 25), Some(10));
        assert_eq!(next_offset(10, 20, 25), None);
        assert_eq!(next_offset(10, 15, 25), None);
        assert_eq!(next_offset(10, i64::MAX, 25), None);
    }

    #[test]
    fn test_page_href() {
        assert_eq!(
            page_href(10, 20, Some(OverallState::Failed)).href,
            "/api/v1/evaluations/jobs?limit=10&offset=20&status=failed"
        );
        assert_eq!(
            page_href(10, 0, None).href,
            "/api/v1/evaluations/jobs?limit=10&offset=0"
        );
    }
}
