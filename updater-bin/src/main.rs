use color_eyre::eyre;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use updater_docker::DockerRuntime;
use updater_orchestrator::Orchestrator;

mod config;

use config::UpdaterConfig;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = UpdaterConfig::from_env()?;
    info!(
        label = %config.orchestrator.label.key,
        tag = %config.orchestrator.tag,
        self_identity = ?config.self_identity,
        "Starting container updater..."
    );

    // One engine client for the lifetime of the process
    let runtime = DockerRuntime::connect_with_defaults()?;
    runtime.ping().await?;
    info!("Connected to container engine.");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current container and stopping");
            shutdown.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        Arc::new(runtime),
        config.self_identity.matcher(),
        config.orchestrator.clone(),
    )
    .with_cancellation(cancel.clone());

    let Some(every) = config.interval else {
        let report = orchestrator.run_pass().await?;
        if report.failed() > 0 {
            warn!(failed = report.failed(), "Some containers were not updated");
        }
        return Ok(());
    };

    info!(interval_secs = every.as_secs(), "Running passes on an interval");
    loop {
        if let Err(e) = orchestrator.run_pass().await {
            error!(error = %e, "Update pass failed");
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(every) => {}
        }
    }
    info!("Container updater stopped.");
    Ok(())
}
