use anyhow::{Context, Result};
use ce_outbox::Manager;
use profile_service::{build_runtime, config::Config, telemetry};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load profile-service config")?;
    telemetry::init_tracing(config.log_format);

    let runtime = build_runtime(&config).await?;
    tracing::info!(
        target: "profile.service",
        service = %config.service_name,
        relay_enabled = config.outbox_relay_enabled,
        channel = %config.outbox.channel,
        "profile service started",
    );

    let shutdown = CancellationToken::new();
    let manager = runtime.manager.clone();
    let relay_shutdown = shutdown.child_token();
    let relay = tokio::spawn(async move { manager.observe(relay_shutdown).await });

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    tracing::info!(target: "profile.service", "shutdown requested");
    shutdown.cancel();
    relay.await.context("join outbox relay")?;
    tracing::info!(target: "profile.service", "profile service stopped");
    Ok(())
}
