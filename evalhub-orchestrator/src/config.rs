//! Service configuration
//!
//! Every setting is a command-line flag with an environment variable
//! fallback. Call [`Config::validate`] after parsing.

use clap::Parser;
use evalhub_kube::Timeouts;
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::db::Dialect;
use crate::dispatch::DispatchSettings;

#[derive(Debug, Clone, Parser)]
#[command(name = "evalhub")]
#[command(about = "EvalHub evaluation job service", long_about = None)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "EVALHUB_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Storage engine: sqlite or postgres
    #[arg(long, env = "EVALHUB_DATABASE_DRIVER", default_value = "sqlite")]
    pub database_driver: String,

    /// Connection URL for the storage engine
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://evalhub.db?mode=rwc")]
    pub database_url: String,

    /// Maximum number of open connections in the pool
    #[arg(long, env = "EVALHUB_DB_MAX_OPEN_CONNS", default_value_t = 10)]
    pub max_open_conns: u32,

    /// Connections kept open while idle
    #[arg(long, env = "EVALHUB_DB_MAX_IDLE_CONNS", default_value_t = 0)]
    pub max_idle_conns: u32,

    /// Maximum lifetime of a pooled connection, in seconds
    #[arg(long, env = "EVALHUB_DB_CONN_MAX_LIFETIME", default_value_t = 1800)]
    pub conn_max_lifetime_secs: u64,

    /// Skip cluster dispatch and only record jobs
    #[arg(long, env = "EVALHUB_LOCAL_MODE", default_value_t = false)]
    pub local_mode: bool,

    /// Namespace for execution units (defaults to the pod's namespace)
    #[arg(long, env = "EVALHUB_NAMESPACE")]
    pub namespace: Option<String>,

    /// Externally reachable URL of this service, handed to execution units
    #[arg(long, env = "EVALHUB_SERVICE_URL")]
    pub service_url: Option<String>,

    /// Secret mounted into execution units as OCI registry credentials
    #[arg(long, env = "EVALHUB_OCI_CREDENTIALS_SECRET")]
    pub oci_credentials_secret: Option<String>,

    /// JSON file with the provider catalogue
    #[arg(long, env = "EVALHUB_PROVIDERS_FILE")]
    pub providers_file: Option<PathBuf>,

    /// MLflow tracking server; experiment tracking is disabled when unset
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    pub mlflow_url: Option<String>,

    /// Cluster API server URL (in-cluster discovery when unset)
    #[arg(long, env = "EVALHUB_KUBE_API_URL")]
    pub kube_api_url: Option<String>,

    /// Upper bound on one call to the cluster API or MLflow, in seconds
    #[arg(long, env = "EVALHUB_HTTP_TIMEOUT", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Upper bound on connecting to the cluster API or MLflow, in seconds
    #[arg(long, env = "EVALHUB_HTTP_CONNECT_TIMEOUT", default_value_t = 10)]
    pub http_connect_timeout_secs: u64,
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        let dialect = self.dialect()?;
        if !self.database_url.starts_with(dialect.url_scheme()) {
            anyhow::bail!(
                "database_url must start with {} for the {} driver",
                dialect.url_scheme(),
                self.database_driver
            );
        }

        if self.max_open_conns == 0 {
            anyhow::bail!("max_open_conns must be greater than 0");
        }

        if self.max_idle_conns > self.max_open_conns {
            anyhow::bail!("max_idle_conns cannot exceed max_open_conns");
        }

        if self.http_timeout_secs == 0 || self.http_connect_timeout_secs == 0 {
            anyhow::bail!("HTTP timeouts must be greater than 0");
        }

        for (name, value) in [
            ("service_url", &self.service_url),
            ("mlflow_url", &self.mlflow_url),
            ("kube_api_url", &self.kube_api_url),
        ] {
            if let Some(url) = value {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("{} must start with http:// or https://", name);
                }
            }
        }

        Ok(())
    }

    pub fn dialect(&self) -> anyhow::Result<Dialect> {
        self.database_driver.parse().map_err(anyhow::Error::msg)
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime_secs)
    }

    /// Database URL safe to log
    pub fn redacted_database_url(&self) -> String {
        redact_password(&self.database_url)
    }

    pub fn http_timeouts(&self) -> Timeouts {
        Timeouts {
            request: Duration::from_secs(self.http_timeout_secs),
            connect: Duration::from_secs(self.http_connect_timeout_secs),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            namespace: self.namespace.clone(),
            service_url: self.service_url.clone(),
            oci_credentials_secret: self.oci_credentials_secret.clone(),
        }
    }
}

fn redact_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("xxxxx")).is_err() {
                return "<redacted>".to_string();
            }
            url.to_string()
        }
        Ok(_) => raw.to_string(),
        Err(_) if raw.contains('@') => "<redacted>".to_string(),
        Err(_) => raw.to_string(),
    }
}
