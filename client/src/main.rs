// Aether client host binary
// Boots the client API server, launches the frontend daemon and stops both on SIGINT/SIGTERM

use std::sync::Arc;

use aether_client_lib::daemon::SystemSpawner;
use aether_client_lib::{telemetry, Config, Host};
use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to read configuration")?;
    telemetry::initialise(&config).context("Failed to initialise logging")?;

    info!(
        build_mode = ?config.build_mode,
        frontend_dir = %config.frontend_dir.display(),
        "Aether client starting"
    );

    let host = Host::boot(config, Arc::new(SystemSpawner::new()))
        .await
        .context("Failed to boot host")?;

    let ports = Arc::clone(host.ports());
    host.gate().run_when_ready(move || {
        info!(
            local_api_port = ports.local_port(),
            daemon_api_port = ports.daemon_port(),
            "Frontend connection ready"
        );
    });

    wait_for_shutdown_signal().await?;
    info!("Shutting down");

    let outcome = host.shutdown().await;
    info!(?outcome, "Aether client stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}
