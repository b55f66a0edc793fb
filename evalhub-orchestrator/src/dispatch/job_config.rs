//! Inputs for the cluster job builders
//!
//! Collects everything the builders need into one value so that the
//! builders themselves stay pure.

use std::path::Path;

use evalhub_core::domain::evaluation::EvaluationJobResource;
use evalhub_core::domain::provider::{EnvVar, ProviderResource};

use super::DispatchSettings;

pub const DEFAULT_CPU_REQUEST: &str = "250m";
pub const DEFAULT_MEMORY_REQUEST: &str = "512Mi";
pub const DEFAULT_CPU_LIMIT: &str = "1";
pub const DEFAULT_MEMORY_LIMIT: &str = "2Gi";
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobConfig {
    pub job_id: String,
    pub namespace: String,
    pub provider_id: String,
    pub benchmark_id: String,
    pub retry_attempts: i32,
    pub timeout_minutes: Option<i32>,
    pub adapter_image: String,
    pub entrypoint: Vec<String>,
    pub service_url: String,
    pub default_env: Vec<EnvVar>,
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub job_spec_json: String,
    pub oci_credentials_secret: Option<String>,
}

/// Build the config for running `benchmark_id` of `job` on `provider`
pub fn build_job_config(
    job: &EvaluationJobResource,
    provider: &ProviderResource,
    benchmark_id: &str,
    settings: &DispatchSettings,
) -> Result<JobConfig, String> {
    let job_spec_json = serde_json::to_string_pretty(job)
        .map_err(|e| format!("marshal job spec: {}", e))?;

    let runtime = provider
        .runtime
        .as_ref()
        .and_then(|r| r.k8s.as_ref())
        .ok_or_else(|| format!("provider '{}' missing runtime configuration", provider.id))?;

    if runtime.image.is_empty() {
        return Err("runtime adapter image is required".to_string());
    }

    let service_url = settings
        .service_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| "EVALHUB_SERVICE_URL is required".to_string())?;

    let retry_attempts = match job.config.retry_attempts {
        Some(n) if n < 0 => return Err("retry attempts cannot be negative".to_string()),
        Some(n) => n,
        None => 0,
    };

    Ok(JobConfig {
        job_id: job.id().to_string(),
        namespace: resolve_namespace(settings.namespace.as_deref()),
        provider_id: provider.id.clone(),
        benchmark_id: benchmark_id.to_string(),
        retry_attempts,
        timeout_minutes: job.config.timeout_minutes,
        adapter_image: runtime.image.clone(),
        entrypoint: runtime.entrypoint.clone(),
        service_url: service_url.to_string(),
        default_env: runtime.env.clone(),
        cpu_request: default_if_empty(&runtime.cpu_request, DEFAULT_CPU_REQUEST),
        memory_request: default_if_empty(&runtime.memory_request, DEFAULT_MEMORY_REQUEST),
        cpu_limit: default_if_empty(&runtime.cpu_limit, DEFAULT_CPU_LIMIT),
        memory_limit: default_if_empty(&runtime.memory_limit, DEFAULT_MEMORY_LIMIT),
        job_spec_json,
        oci_credentials_secret: settings
            .oci_credentials_secret
            .clone()
            .filter(|s| !s.is_empty()),
    })
}

fn default_if_empty(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Configured namespace, else the pod's own namespace, else `default`
pub fn resolve_namespace(configured: Option<&str>) -> String {
    let file = Path::new(evalhub_kube::SERVICE_ACCOUNT_DIR).join("namespace");
    resolve_namespace_from(configured, &file)
}

fn resolve_namespace_from(configured: Option<&str>, namespace_file: &Path) -> String {
    if let Some(ns) = configured.filter(|ns| !ns.is_empty()) {
        return ns.to_string();
    }

    std::fs::read_to_string(namespace_file)
        .ok()
        .map(|content| content.trim().to_string())
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}
