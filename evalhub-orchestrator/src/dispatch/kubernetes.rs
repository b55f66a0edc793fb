//! Kubernetes dispatcher
//!
//! Submits a ConfigMap holding the job spec, then the Job that mounts it.
//! If the Job is rejected the ConfigMap is removed again.

use std::sync::Arc;

use async_trait::async_trait;
use evalhub_core::domain::evaluation::{BenchmarkConfig, EvaluationJobResource};
use evalhub_core::domain::provider::ProviderResource;
use evalhub_kube::ClusterClient;

use super::builder::{build_config_map, build_job, config_map_name, job_name};
use super::job_config::{build_job_config, resolve_namespace};
use super::{DispatchSettings, Dispatcher};
use crate::error::{ServiceError, ServiceResult};
use crate::providers::ProviderCatalogue;

pub struct KubernetesDispatcher {
    client: Arc<dyn ClusterClient>,
    providers: Arc<ProviderCatalogue>,
    settings: DispatchSettings,
}

impl KubernetesDispatcher {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        providers: Arc<ProviderCatalogue>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            client,
            providers,
            settings,
        }
    }

    /// The single benchmark of `job` and the provider that runs it
    fn resolve<'a>(
        &'a self,
        job: &'a EvaluationJobResource,
    ) -> ServiceResult<(&'a ProviderResource, &'a BenchmarkConfig)> {
        if self.providers.is_empty() {
            return Err(ServiceError::dispatch(job.id(), "no provider configs loaded"));
        }

        let benchmark = match job.config.benchmarks.as_slice() {
            [benchmark] => benchmark,
            [] => {
                return Err(ServiceError::dispatch(
                    job.id(),
                    "evaluation contains no benchmarks",
                ));
            }
            many => {
                return Err(ServiceError::dispatch(
                    job.id(),
                    format!(
                        "multi-benchmark evaluations are not supported (count: {})",
                        many.len()
                    ),
                ));
            }
        };
        if benchmark.id.is_empty() {
            return Err(ServiceError::dispatch(job.id(), "evaluation benchmark id is empty"));
        }

        let provider = self.providers.resolve(benchmark).ok_or_else(|| {
            ServiceError::dispatch(
                job.id(),
                format!("no provider found for benchmark '{}'", benchmark.id),
            )
        })?;
        Ok((provider, benchmark))
    }

    /// Provider id used when the resources for `benchmark` were named
    fn provider_id_for<'a>(&'a self, benchmark: &'a BenchmarkConfig) -> &'a str {
        self.providers
            .resolve(benchmark)
            .map(|p| p.id.as_str())
            .unwrap_or(benchmark.provider_id.as_str())
    }
}

#[async_trait]
impl Dispatcher for KubernetesDispatcher {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn run(&self, job: &EvaluationJobResource) -> ServiceResult<()> {
        let (provider, benchmark) = self.resolve(job)?;

        let cfg = build_job_config(job, provider, &benchmark.id, &self.settings)
            .map_err(|msg| ServiceError::dispatch(job.id(), msg))?;
        let config_map = build_config_map(&cfg);
        let cluster_job = build_job(&cfg).map_err(|msg| ServiceError::dispatch(job.id(), msg))?;

        self.client
            .create_config_map(&config_map)
            .await
            .map_err(|e| ServiceError::cluster(job.id(), e))?;

        if let Err(err) = self.client.create_job(&cluster_job).await {
            let namespace = &config_map.metadata.namespace;
            let name = &config_map.metadata.name;
            match self.client.delete_config_map(namespace, name).await {
                Ok(()) => {}
                Err(cleanup) if cleanup.is_not_found() => {}
                Err(cleanup) => {
                    tracing::warn!(
                        job_id = %job.id(),
                        config_map = %name,
                        error = %cleanup,
                        "Failed to delete ConfigMap after Job creation error"
                    );
                }
            }
            return Err(ServiceError::cluster(job.id(), err));
        }

        tracing::info!(
            job_id = %job.id(),
            provider_id = %provider.id,
            benchmark_id = %benchmark.id,
            namespace = %cfg.namespace,
            job_name = %cluster_job.metadata.name,
            "Evaluation job dispatched"
        );
        Ok(())
    }

    async fn delete_resources(&self, job: &EvaluationJobResource) -> ServiceResult<()> {
        let namespace = resolve_namespace(self.settings.namespace.as_deref());
        let mut errors = Vec::new();

        for benchmark in &job.config.benchmarks {
            let provider_id = self.provider_id_for(benchmark);

            let name = job_name(job.id(), provider_id, &benchmark.id);
            match self.client.delete_job(&namespace, &name).await {
                Err(err) if !err.is_not_found() => {
                    errors.push(format!("delete job {}: {}", name, err));
                }
                _ => {}
            }

            let name = config_map_name(job.id(), provider_id, &benchmark.id);
            match self.client.delete_config_map(&namespace, &name).await {
                Err(err) if !err.is_not_found() => {
                    errors.push(format!("delete configmap {}: {}", name, err));
                }
                _ => {}
            }
        }

        if errors.is_empty() {
            tracing::debug!(job_id = %job.id(), "Cluster resources deleted");
            Ok(())
        } else {
            Err(ServiceError::dispatch(job.id(), errors.join("; ")))
        }
    }
}
