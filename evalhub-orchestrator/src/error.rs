//! Service Errors
//!
//! Domain error taxonomy shared by the store, the dispatchers and the API.
//! Each variant carries a stable code and maps to one HTTP status.

use axum::http::StatusCode;
use evalhub_core::domain::state::OverallState;
use evalhub_kube::KubeError;

/// Errors surfaced by evaluation job operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("The {kind} resource {id} was not found.")]
    ResourceNotFound { kind: &'static str, id: String },

    #[error("The evaluation job {id} can not be cancelled because it is '{state}'.")]
    JobCanNotBeCancelled { id: String, state: OverallState },

    #[error(
        "The request validation failed: '{0}'. Please check the request and try again."
    )]
    ValidationFailed(String),

    #[error("The query parameter '{name}' is not a valid {expected}: '{value}'.")]
    QueryParameterInvalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("The request for the {kind} resource {id} failed: '{source}'.")]
    DatabaseOperationFailed {
        kind: &'static str,
        id: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("The request for the {kind} failed: '{source}'.")]
    QueryFailed {
        kind: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("The JSON unmarshalling failed for the {kind}: '{source}'.")]
    JsonFailed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("An internal server error occurred: '{0}'.")]
    Internal(String),

    #[error("The evaluation job {id} was modified concurrently. Please retry the request.")]
    ConcurrentModification { id: String },

    #[error(
        "MLflow is required for experiment tracking. Please configure MLflow in the service configuration and try again."
    )]
    ExperimentTrackingRequired,

    #[error(
        "The MLflow request failed: '{0}'. Please check the MLflow configuration and try again."
    )]
    ExperimentTrackingFailed(String),

    #[error("The dispatch of evaluation job {id} failed: '{message}'.")]
    DispatchFailed {
        id: String,
        message: String,
        #[source]
        source: Option<KubeError>,
    },
}

impl ServiceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn dispatch(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DispatchFailed {
            id: id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn cluster(id: impl Into<String>, source: KubeError) -> Self {
        Self::DispatchFailed {
            id: id.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::JobCanNotBeCancelled { .. } => "job_can_not_be_cancelled",
            Self::ValidationFailed(_) => "request_validation_failed",
            Self::QueryParameterInvalid { .. } => "query_parameter_invalid",
            Self::DatabaseOperationFailed { .. } => "database_operation_failed",
            Self::QueryFailed { .. } => "query_failed",
            Self::JsonFailed { .. } => "json_unmarshal_failed",
            Self::Internal(_) => "internal_server_error",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::ExperimentTrackingRequired => "mlflow_required_for_experiment",
            Self::ExperimentTrackingFailed(_) => "mlflow_request_failed",
            Self::DispatchFailed { .. } => "evaluation_job_dispatch_failed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::JobCanNotBeCancelled { .. } | Self::ConcurrentModification { .. } => {
                StatusCode::CONFLICT
            }
            Self::ValidationFailed(_)
            | Self::QueryParameterInvalid { .. }
            | Self::ExperimentTrackingRequired => StatusCode::BAD_REQUEST,
            Self::DispatchFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::DatabaseOperationFailed { .. }
            | Self::QueryFailed { .. }
            | Self::JsonFailed { .. }
            | Self::Internal(_)
            | Self::ExperimentTrackingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
