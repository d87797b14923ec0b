use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use swapslot::config::Config;
use swapslot::engine::Engine;
use swapslot::notify::NotifyHub;
use swapslot::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::load()?;
    // Fail fast on a bad default timezone rather than on first profile write.
    config.default_tz()?;
    swapslot::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify)?);

    info!("swapslot started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  default_timezone: {}", config.default_timezone);
    info!("  sweep_interval: {:?}", config.sweep_interval());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(sweeper::run_sweeper(engine.clone(), config.sweep_interval()));
    let compactor = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.retry_policy(),
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    sweeper.abort();
    compactor.abort();

    // Leave a compact WAL behind so the next start replays quickly.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("swapslot stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
