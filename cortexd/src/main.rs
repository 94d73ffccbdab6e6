mod api;
mod bootstrap;
mod cli;
mod config;
mod controllers;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use common::SchedulingDomain;
use libbus::{LocalBus, MessageBus};
use libextract::{ExtractionPipeline, ExtractorMetrics};
use libpipeline::PipelineMetrics;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::cli::{Cli, Commands};
use crate::config::{Config, load_config};
use crate::controllers::{
    CleanupLoop, DbServerLister, DecisionController, ExplanationController,
};
use crate::store::ObjectStore;
use crate::store::multicluster::{ConnectProfile, MulticlusterStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Start { config } => {
            let cfg = load_config(config.to_str().context("config path is not valid utf-8")?)?;
            serve(cfg).await
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let db = PgPoolOptions::new()
        .max_connections(12)
        .connect(&cfg.db_url)
        .await
        .context("failed to connect to the feature database")?;

    let home_profile = ConnectProfile {
        endpoints: cfg.etcd.endpoints.clone(),
        username: cfg.etcd.username.clone(),
        password: cfg.etcd.password.clone(),
        ca_cert_pem: read_pem(cfg.etcd.ca_cert_file.as_deref())?,
    };
    let home = ObjectStore::connect(&home_profile.endpoints, home_profile.connect_options())
        .await?;
    let store = MulticlusterStore::new(home, home_profile);
    for remote in &cfg.remote_clusters {
        store
            .add_remote(
                remote.endpoints.clone(),
                read_pem(remote.ca_cert_file.as_deref())?,
                &remote.kinds,
            )
            .await
            .context("failed to register remote cluster")?;
    }

    bootstrap::seed_defaults(&store, &cfg.operator).await?;

    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
    let registry = prometheus::Registry::new();
    let pipeline_metrics = PipelineMetrics::new(&registry, cfg.monitoring.labels.clone())
        .context("failed to register pipeline metrics")?;
    let extractor_metrics = ExtractorMetrics::new(&registry, cfg.monitoring.labels.clone())
        .context("failed to register extractor metrics")?;

    let extraction = ExtractionPipeline::new(
        &cfg.extractors,
        db.clone(),
        bus.clone(),
        Some(extractor_metrics),
    )
    .await
    .context("failed to build the feature extraction pipeline")?;
    extraction.clone().start().await;
    {
        let extraction = extraction.clone();
        let interval = Duration::from_secs(cfg.extract_interval_secs);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                extraction.run_all().await;
            }
        });
    }

    let mut nova_controller = None;
    for domain in &cfg.scheduling_domains {
        let controller = DecisionController::new(
            *domain,
            cfg.operator.clone(),
            store.clone(),
            db.clone(),
            bus.clone(),
            Some(pipeline_metrics.clone()),
        );
        controller
            .clone()
            .run()
            .await
            .with_context(|| format!("failed to start the {domain} decision controller"))?;
        if *domain == SchedulingDomain::Nova {
            CleanupLoop::new(
                store.clone(),
                cfg.operator.clone(),
                Box::new(DbServerLister::new(db.clone())),
                Duration::from_secs(cfg.cleanup_interval_secs),
            )
            .spawn();
            nova_controller = Some(controller);
        }
    }

    ExplanationController::new(store.clone(), cfg.operator.clone())
        .run()
        .await?;

    let state = Arc::new(AppState {
        operator: cfg.operator.clone(),
        nova: nova_controller,
        registry,
    });
    let listener = tokio::net::TcpListener::bind(&cfg.addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    let app = api::create_router(state).layer(TraceLayer::new_for_http());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn read_pem(path: Option<&std::path::Path>) -> Result<Option<String>> {
    match path {
        Some(path) => Ok(Some(std::fs::read_to_string(path).with_context(|| {
            format!("failed to read CA certificate {}", path.display())
        })?)),
        None => Ok(None),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down...");
}
