use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use threshold_watch::{
    actors::scheduler::SchedulerHandle,
    api::{ApiConfig, ApiState, spawn_api_server},
    broadcaster::Broadcaster,
    config::{ConfigError, ConfigStore, Settings},
    extractor::HttpExtractor,
    protocol::ControlProtocol,
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Environment file to load before reading settings
    #[arg(short, long)]
    env_file: Option<PathBuf>,
}

fn init() {
    let filter = filter::Targets::new()
        .with_target("threshold_watch", LevelFilter::TRACE)
        .with_target("tower_http", LevelFilter::DEBUG);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    match &args.env_file {
        Some(path) => {
            dotenv::from_path(path).with_context(|| format!("failed to load {}", path.display()))?
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(ConfigError::Missing(keys)) => {
            error!("missing or empty environment variables:");
            for key in &keys {
                error!("   - {key}");
            }
            return Err(ConfigError::Missing(keys).into());
        }
        Err(e) => return Err(e.into()),
    };

    let extractor = HttpExtractor::new(settings.source.clone(), settings.extract_timeout)?;
    let config = ConfigStore::new(settings.initial);
    let broadcaster = Broadcaster::new();

    spawn_config_logger(&config);

    info!(
        "monitoring {} (threshold {}, every {}ms)",
        settings.source.login_url, settings.initial.threshold, settings.initial.poll_interval_ms
    );
    let scheduler = SchedulerHandle::spawn(
        Arc::new(extractor),
        config.clone(),
        broadcaster.clone(),
        settings.extract_timeout,
    );

    let protocol = ControlProtocol::new(config, broadcaster.clone(), scheduler.clone());
    let api_config = ApiConfig {
        bind_addr: SocketAddr::new(settings.server.bind_addr, settings.server.port),
        static_dir: Some(settings.server.static_dir.clone()),
    };
    let addr = spawn_api_server(api_config, ApiState::new(protocol)).await?;
    info!("web interface: http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    scheduler.stop().await;
    broadcaster.close_all().await;

    Ok(())
}

/// Trace every configuration change
fn spawn_config_logger(config: &ConfigStore) {
    let mut changes = config.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let current = *changes.borrow_and_update();
            debug!(
                "configuration is now threshold={} interval={}ms",
                current.threshold, current.poll_interval_ms
            );
        }
    });
}
