//! Job dispatch
//!
//! A dispatcher turns a stored evaluation job into running work. The
//! Kubernetes dispatcher creates one cluster Job per benchmark; the local
//! dispatcher accepts jobs without running anything.

pub mod builder;
pub mod job_config;
pub mod kubernetes;
pub mod local;

pub use kubernetes::KubernetesDispatcher;
pub use local::LocalDispatcher;

use async_trait::async_trait;
use evalhub_core::domain::evaluation::EvaluationJobResource;

use crate::error::ServiceResult;

/// Runs evaluation jobs and cleans up after them
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Start the work for a freshly created job
    async fn run(&self, job: &EvaluationJobResource) -> ServiceResult<()>;

    /// Remove whatever `run` created for the job
    async fn delete_resources(&self, job: &EvaluationJobResource) -> ServiceResult<()>;
}

/// Deployment settings shared by the cluster builders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSettings {
    pub namespace: Option<String>,
    pub service_url: Option<String>,
    pub oci_credentials_secret: Option<String>,
}
