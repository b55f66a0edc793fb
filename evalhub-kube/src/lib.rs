//! EvalHub cluster client
//!
//! A small, typed client for the parts of the Kubernetes REST API that the
//! evaluation dispatcher needs: creating and deleting ConfigMaps and
//! batch/v1 Jobs in a namespace.
//!
//! # Example
//!
//! ```no_run
//! use evalhub_kube::{ClusterClient, KubeClient, Timeouts};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = KubeClient::in_cluster(Timeouts::default())?;
//!     client.delete_job("evalhub", "eval-job-a-b-c-1234abcd").await?;
//!     Ok(())
//! }
//! ```

mod configmaps;
pub mod error;
mod jobs;
pub mod resources;

pub use error::{KubeError, Result};
pub use resources::{ConfigMap, Job};

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

/// Directory where the service account credentials are mounted in a pod
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Bounds applied to every outbound HTTP call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Whole request, from connect to the last byte of the body
    pub request: Duration,
    /// TCP and TLS connection setup
    pub connect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            connect: Duration::from_secs(10),
        }
    }
}

impl Timeouts {
    /// Apply both bounds to a client builder
    pub fn apply(self, builder: ClientBuilder) -> ClientBuilder {
        builder.timeout(self.request).connect_timeout(self.connect)
    }
}

/// Resource operations the dispatcher performs against a cluster
///
/// Implemented by [`KubeClient`]; tests substitute an in-memory fake.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a ConfigMap in the namespace named by its metadata
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    /// Delete a ConfigMap by name
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a Job in the namespace named by its metadata
    async fn create_job(&self, job: &Job) -> Result<Job>;

    /// Delete a Job by name, letting its pods be collected in the background
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;
}

/// HTTP client for the Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubeClient {
    /// Base URL of the API server (e.g., "https://10.0.0.1:443")
    base_url: String,
    /// HTTP client instance
    client: Client,
    /// Bearer token sent with every request
    token: Option<String>,
}

impl KubeClient {
    /// Create a new client for an API server URL
    pub fn new(base_url: impl Into<String>, timeouts: Timeouts) -> Result<Self> {
        let client = timeouts.apply(Client::builder()).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new client with a custom HTTP client
    ///
    /// Use this to configure timeouts, proxies, or TLS roots.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: None,
        }
    }

    /// Attach a bearer token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build a client from the pod's service account
    ///
    /// Reads the API server address from `KUBERNETES_SERVICE_HOST` and
    /// `KUBERNETES_SERVICE_PORT`, and trusts the mounted cluster CA.
    pub fn in_cluster(timeouts: Timeouts) -> Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| KubeError::Config("KUBERNETES_SERVICE_HOST is not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| KubeError::Config(format!("failed to read service account token: {e}")))?;
        let ca = std::fs::read(dir.join("ca.crt"))
            .map_err(|e| KubeError::Config(format!("failed to read cluster CA: {e}")))?;
        let ca = reqwest::Certificate::from_pem(&ca)?;

        let client = timeouts
            .apply(Client::builder())
            .add_root_certificate(ca)
            .build()?;

        // IPv6 service hosts must be bracketed
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        Ok(Self::with_client(format!("https://{host}:{port}"), client).with_token(token.trim()))
    }

    /// Get the base URL of the API server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KubeError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| KubeError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response whose body is not needed
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KubeError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(KubeError::InvalidRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        KubeClient::create_config_map(self, config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        KubeClient::delete_config_map(self, namespace, name).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        KubeClient::create_job(self, job).await
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        KubeClient::delete_job(self, namespace, name).await
    }
}
