use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use evalhub_kube::KubeClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evalhub_orchestrator::api::{self, AppState};
use evalhub_orchestrator::config::Config;
use evalhub_orchestrator::db::{self, PoolSettings};
use evalhub_orchestrator::dispatch::{Dispatcher, KubernetesDispatcher, LocalDispatcher};
use evalhub_orchestrator::providers::ProviderCatalogue;
use evalhub_orchestrator::service::EvaluationStore;
use evalhub_orchestrator::tracking::{ExperimentTracker, MlflowTracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evalhub_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate()?;
    let dialect = config.dialect()?;

    tracing::info!("Starting EvalHub...");
    tracing::info!(
        driver = %config.database_driver,
        url = %config.redacted_database_url(),
        "Connecting to database..."
    );

    let pool_settings = PoolSettings {
        max_open_conns: config.max_open_conns,
        max_idle_conns: config.max_idle_conns,
        conn_max_lifetime: config.conn_max_lifetime(),
    };
    let pool = db::create_pool(&config.database_url, &pool_settings)
        .await
        .context("Failed to create database pool")?;
    db::ping(&pool).await.context("Database did not answer")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool, dialect)
        .await
        .context("Failed to run database migrations")?;

    let providers = Arc::new(match &config.providers_file {
        Some(path) => ProviderCatalogue::load(path)?,
        None => ProviderCatalogue::default(),
    });

    let dispatcher: Arc<dyn Dispatcher> = if config.local_mode {
        Arc::new(LocalDispatcher)
    } else {
        let timeouts = config.http_timeouts();
        let client = match &config.kube_api_url {
            Some(url) => KubeClient::new(url.as_str(), timeouts)
                .context("Failed to create cluster client")?,
            None => KubeClient::in_cluster(timeouts)
                .context("Failed to load in-cluster configuration")?,
        };
        Arc::new(KubernetesDispatcher::new(
            Arc::new(client),
            providers.clone(),
            config.dispatch_settings(),
        ))
    };
    tracing::info!(dispatcher = dispatcher.name(), "Dispatcher selected");

    let tracker = match &config.mlflow_url {
        Some(url) => {
            tracing::info!(url = %url, "MLflow experiment tracking enabled");
            let tracker = MlflowTracker::new(url.as_str(), config.http_timeouts())
                .context("Failed to create MLflow client")?;
            Some(Arc::new(tracker) as Arc<dyn ExperimentTracker>)
        }
        None => None,
    };

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        store: EvaluationStore::new(pool, dialect),
        dispatcher,
        tracker,
        providers,
    });
    let app = if config.local_mode {
        app.layer(api::local_cors())
    } else {
        app
    };

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
