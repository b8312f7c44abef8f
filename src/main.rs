//! Query Exporter Binary Entry Point
//!
//! Loads the configuration, opens the data source, starts one scheduler per
//! distinct schedule and serves the scrape endpoint.

use clap::Parser;
use query_exporter::{
    collector::{
        Collector, CollectorSet, QueryCollector, Scheduler, SchedulerHandle, refresh_all,
    },
    config::AppConfig,
    server::{AppState, create_router},
    source::SqlSource,
};
use prometheus::Registry;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Query Exporter - periodic queries as Prometheus metrics
#[derive(Parser, Debug)]
#[command(name = "query-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "QUERY_EXPORTER_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "QUERY_EXPORTER_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "QUERY_EXPORTER_SERVER_PORT")]
    server_port: Option<u16>,

    /// Data source URL (overrides config file)
    #[arg(long, env = "QUERY_EXPORTER_SOURCE_URL")]
    source_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,query_exporter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load_with_collector_path(&cli.config)?;

    // CLI > ENV > config file
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(url) = cli.source_url {
        config.source.url = url;
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}, Source: {} (pool: {})",
        config.server.bind,
        config.server.port,
        config.source.url,
        config.source.max_connections,
    );

    let source = Arc::new(SqlSource::connect(&config.source.url, config.source.max_connections).await?);

    let mut collectors = Vec::new();
    for query in config.collectors.queries {
        if !query.enabled {
            tracing::debug!(collector = %query.name, "Skipping disabled collector");
            continue;
        }
        collectors.push(Arc::new(QueryCollector::new(query, source.clone())?));
    }

    // Warm the caches so the first scrape has data.
    let dyn_collectors: Vec<Arc<dyn Collector>> = collectors
        .iter()
        .map(|c| c.clone() as Arc<dyn Collector>)
        .collect();
    refresh_all(&dyn_collectors).await;

    let handles = spawn_schedulers(&dyn_collectors);
    tracing::info!(
        "Started {} scheduler(s) for {} collector(s)",
        handles.len(),
        dyn_collectors.len()
    );

    let collectors = CollectorSet::new(collectors);
    let registry = Registry::new();
    collectors.register(&registry)?;

    let app = create_router(AppState {
        collectors,
        registry,
    });
    let addr = config.server.socket_addr()?;

    tracing::info!("Scrape endpoint: http://{}/metrics", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down schedulers...");
    for handle in handles {
        if let Err(e) = handle.shutdown().await {
            tracing::error!("Failed to shutdown scheduler: {}", e);
        }
    }

    tracing::info!("Closing data source...");
    source.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// One scheduler per distinct schedule, in first-seen order.
fn spawn_schedulers(collectors: &[Arc<dyn Collector>]) -> Vec<SchedulerHandle> {
    let mut schedulers: Vec<Scheduler> = Vec::new();

    for collector in collectors {
        let schedule = collector.schedule();
        match schedulers.iter_mut().find(|s| *s.schedule() == schedule) {
            Some(scheduler) => scheduler.register(collector.clone()),
            None => {
                let mut scheduler = Scheduler::new(schedule);
                scheduler.register(collector.clone());
                schedulers.push(scheduler);
            }
        }
    }

    schedulers.into_iter().map(Scheduler::spawn).collect()
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
