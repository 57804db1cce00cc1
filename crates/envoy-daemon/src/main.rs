//! Telemetry Envoy daemon
//!
//! Supervises telemetry agents on an edge host, driven by instructions read
//! from stdin as newline-delimited JSON.

use anyhow::Context;
use envoy_core::{
    default_registry, AgentsRouter, CommandHandler, EnvoySettings, StandardCommandHandler,
    TarballInstaller, TracingOutputSink,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod instructions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Telemetry Envoy v{}", env!("CARGO_PKG_VERSION"));

    let settings = EnvoySettings::load().context("loading settings")?;
    info!(data_path = %settings.agents.data_path.display(), "loaded settings");

    let command_handler: Arc<dyn CommandHandler> = Arc::new(StandardCommandHandler::new(
        Arc::new(TracingOutputSink),
        &settings.agents,
    ));
    let registry = default_registry(&settings, command_handler);
    registry
        .load_all(&settings.agents.data_path)
        .context("loading agent runners")?;

    let ctx = CancellationToken::new();
    let router = Arc::new(AgentsRouter::new(
        settings.agents.data_path.clone(),
        Arc::new(registry),
        Arc::new(TarballInstaller::new()),
        ctx.clone(),
    ));

    // Replay starts from a clean slate
    router.purge_agent_configs().await;

    let router_task = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.start().await })
    };
    let instructions_task = tokio::spawn(instructions::read_instructions(
        tokio::io::stdin(),
        Arc::clone(&router),
        ctx.clone(),
    ));

    shutdown_signal().await;
    info!("cancelling application context");
    ctx.cancel();

    router_task.await.context("waiting for agents to stop")?;
    if let Err(e) = instructions_task.await {
        warn!(error = %e, "instruction reader ended abnormally");
    }

    info!("Telemetry Envoy shut down");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "unable to listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("received shutdown signal");
}
