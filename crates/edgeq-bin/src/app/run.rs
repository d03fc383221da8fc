//! Long-running queue mode.

use anyhow::Context;
use edgeq_config_and_utils::{Config, Paths};
use edgeq_delivery::{
    BackoffPolicy, ConnectionConfig, DeliveryConfig, EdgeQueue, QueueSettings, RetentionConfig,
};
use edgeq_store::Database;
use edgeq_transport::{ConnectOptions, MqttTransport};
use std::sync::Arc;
use tracing::info;

/// Map validated configuration onto component settings.
pub(crate) fn queue_settings(config: &Config) -> QueueSettings {
    QueueSettings {
        connection: ConnectionConfig {
            options: ConnectOptions {
                host: config.host.clone(),
                port: config.port,
                username: config.username.clone(),
                password: config.password.clone(),
                client_id: config.client_identity.clone(),
                keepalive: config.keepalive(),
                connect_timeout: config.connect_timeout(),
            },
            backoff: BackoffPolicy::new(
                config.reconnect_min(),
                config.reconnect_max(),
                config.reconnect_jitter,
            ),
        },
        delivery: DeliveryConfig {
            poll_interval: config.poll_interval(),
            ack_timeout: config.ack_timeout(),
        },
        retention: config.retention_window().map(|window| RetentionConfig {
            window,
            sweep_interval: config.retention_sweep(),
        }),
    }
}

/// Run until SIGINT or SIGTERM, then stop every loop and close the store.
pub async fn run_queue(config: Config, paths: Paths) -> anyhow::Result<()> {
    let store_path = config.resolved_store_path(&paths);
    let store = Arc::new(
        Database::open(&store_path)
            .with_context(|| format!("opening store at {}", store_path.display()))?,
    );

    let stats = store.stats()?;
    info!(
        host = %config.host,
        port = config.port,
        pending = stats.pending,
        retention_seconds = ?config.retention_window_seconds,
        "Starting EdgeQ"
    );

    let queue = EdgeQueue::new(
        Arc::clone(&store),
        Arc::new(MqttTransport::new()),
        queue_settings(&config),
    );
    let runtime = queue.start();

    wait_for_shutdown_signal().await?;
    info!("Shutdown requested");

    runtime.shutdown().await;
    drop(queue);
    match Arc::try_unwrap(store) {
        Ok(store) => store.close()?,
        Err(_) => info!("Store still shared at exit, leaving close to drop"),
    }

    info!("EdgeQ stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("listening for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")
}
