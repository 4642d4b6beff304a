//! Node Healer - Kubernetes node self-healing controller
//!
//! Scores every node from Prometheus health signals and cordons, drains
//! and replaces nodes that stay unhealthy, one bounded drain at a time.

use anyhow::{Context, Result};
use healer_lib::{
    cloud::{CloudProvider, HttpCloudProvider, NoopCloudProvider},
    cluster::KubeClusterApi,
    collector::PrometheusCollector,
    evaluator::{EvaluationScheduler, NodeEvaluator},
    health::{components, HealthRegistry},
    observability::{HealerMetrics, StructuredLogger},
    store::{FileRecordStore, MemoryRecordStore, NodeAnnotationStore, RecordStore},
    StatusBoard,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod watcher;

use config::{ControllerConfig, StoreBackend};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting node-healer");

    let config = ControllerConfig::load()?;
    info!(
        controller = %config.controller_name,
        policies = config.policies.len(),
        store = ?config.store.backend,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::CLUSTER_API).await;
    health_registry.register(components::RECORD_STORE).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = HealerMetrics::new();
    let logger = StructuredLogger::new(&config.controller_name);
    logger.log_startup(CONTROLLER_VERSION, config.policies.len());

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Annotation => Arc::new(NodeAnnotationStore::new(client.clone())),
        StoreBackend::File => Arc::new(FileRecordStore::new(config.store.path.clone())),
        StoreBackend::Memory => {
            warn!("In-memory record store selected; remediation state is lost on restart");
            Arc::new(MemoryRecordStore::new())
        }
    };

    let cloud: Arc<dyn CloudProvider> = match &config.cloud.endpoint {
        Some(endpoint) => Arc::new(HttpCloudProvider::new(
            endpoint,
            Duration::from_secs(config.cloud.timeout_secs),
        )?),
        None => {
            warn!("No cloud endpoint configured; node replacement is disabled");
            Arc::new(NoopCloudProvider)
        }
    };

    let collector = PrometheusCollector::new(
        &config.prometheus.url,
        config.queries(),
        Duration::from_secs(config.prometheus.timeout_secs),
    )?;

    let board = Arc::new(StatusBoard::new());
    let evaluator = Arc::new(
        NodeEvaluator::builder()
            .cluster(Arc::new(KubeClusterApi::new(client.clone())))
            .collector(Arc::new(collector))
            .resolver(Arc::new(config.resolver()?))
            .store(store)
            .cloud(cloud)
            .scorer(config.scorer())
            .sink(board.clone())
            .sink(Arc::new(metrics.clone()))
            .health(health_registry.clone())
            .logger(logger.clone())
            .config(config.evaluator_config())
            .executor_config(config.executor_config())
            .build()?,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (scheduler, scheduler_handle) =
        EvaluationScheduler::new(evaluator.clone(), config.scheduler_config());
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let node_watcher = watcher::NodeWatcher::new(
        client,
        config.node_label_selector.clone(),
        scheduler_handle.clone(),
        health_registry.clone(),
    );
    let watcher_task = tokio::spawn(node_watcher.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics,
        board,
        evaluator,
        scheduler: scheduler_handle,
    });
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;

    let reason = tokio::select! {
        signal = shutdown_signal() => signal?,
        served = api_handle => match served {
            Ok(Ok(())) => "API server exited",
            Ok(Err(e)) => {
                error!(error = %e, "API server failed");
                "API server failed"
            }
            Err(e) => {
                error!(error = %e, "API server task panicked");
                "API server panicked"
            }
        },
    };

    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    // no receivers left means both tasks already stopped
    let _ = shutdown_tx.send(());

    if let Err(e) = watcher_task.await {
        error!(error = %e, "Node watcher task failed");
    }
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task failed");
    }

    info!("Shutting down");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT received")
        }
        _ = terminate.recv() => Ok("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT received")
}
