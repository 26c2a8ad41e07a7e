use std::error::Error;

use build_trigger::{InMemoryScheduler, Poller, TriggerConfig, telemetry};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(telemetry::env_filter_with_level("info", Level::INFO))
        .with(telemetry::layer())
        .init();

    // A missing .env is fine, variables may come from the environment.
    if let Err(e) = dotenvy::dotenv() {
        warn!(error = %e, ".env not loaded");
    }

    let cfg = TriggerConfig::from_env()?;
    info!(
        host = %cfg.client.host,
        project = %cfg.client.project,
        repo = %cfg.client.repository,
        job = %cfg.job_name,
        interval = ?cfg.poll_interval,
        "stash-pr-builder started"
    );

    // No host scheduler is attached: builds are queued in memory (dry run).
    let mut poller = Poller::new(&cfg, InMemoryScheduler::default())?;
    let mut ticker = tokio::time::interval(cfg.poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poller.poll_once().await;
                for line in poller.last_poll_log() {
                    info!("{line}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
