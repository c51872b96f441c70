//! # Mini-Jupyter Kernel
//!
//! Runs the demo kernel on the in-memory transport, with an IOPub bridge and
//! a heartbeat monitor attached.
//!
//! ```text
//! mj-kernel [CONFIG.toml]
//! ```
//!
//! The config path falls back to `MJ_CONFIG`, then to built-in defaults.
//! `MJ_*` environment variables override file values.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use mj_kernel::{ClientRegistry, IopubBridge, KernelClient, KernelConfig, KernelService};
use mj_patterns::{HeartbeatMonitor, LivenessEvent};
use mj_telemetry::{init_telemetry, HEARTBEAT_TIMEOUTS};
use mj_transport::InMemoryTransport;

const SELF_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

fn load_config() -> Result<KernelConfig> {
    let path = env::args().nth(1).or_else(|| env::var("MJ_CONFIG").ok());
    let config = match &path {
        Some(path) => KernelConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => KernelConfig::default(),
    };
    let config = config
        .with_env_overrides()
        .context("Invalid environment override")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    let _telemetry = init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  Mini-Jupyter Kernel v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let transport = InMemoryTransport::new();
    let kernel = Arc::new(
        KernelService::start(&transport, &config)
            .await
            .context("Failed to start kernel")?,
    );

    let clients = Arc::new(ClientRegistry::new());
    let bridge = IopubBridge::connect(&transport, &config.endpoints.iopub, clients.clone())
        .await
        .context("Failed to connect IOPub bridge")?;
    let monitor = HeartbeatMonitor::connect(
        &transport,
        &config.endpoints.heartbeat,
        config.heartbeat.timeout,
    )
    .await
    .context("Failed to connect heartbeat monitor")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let kernel_task = {
        let kernel = Arc::clone(&kernel);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = kernel.run() => {
                    if let Err(e) = res {
                        error!(error = %e, "Kernel stopped with error");
                    }
                }
                _ = shutdown.changed() => info!("[kernel] Shutdown signal received"),
            }
        })
    };

    let bridge_task = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = bridge.run() => {
                    if let Err(e) = res {
                        error!(error = %e, "IOPub bridge stopped with error");
                    }
                }
                _ = shutdown.changed() => info!("[bridge] Shutdown signal received"),
            }
        })
    };

    let liveness_task = {
        let mut shutdown = shutdown_rx.clone();
        let mut liveness = monitor.spawn();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = liveness.next() => match event {
                        Some(LivenessEvent::Timeout { silent_for }) => {
                            warn!(?silent_for, total = HEARTBEAT_TIMEOUTS.get(), "Kernel heartbeat lost");
                        }
                        Some(LivenessEvent::Recovered) => info!("Kernel heartbeat recovered"),
                        None => return,
                    },
                    _ = shutdown.changed() => return,
                }
            }
        })
    };

    let client = KernelClient::connect(&transport, &config.endpoints, &config.service.user_id)
        .await
        .context("Failed to connect self-check client")?;
    let info = tokio::time::timeout(SELF_CHECK_TIMEOUT, client.core_info())
        .await
        .context("Self-check timed out")?
        .context("Self-check failed")?;
    info!(
        core_status = %info.core_status,
        core_version = %info.core_version,
        "Kernel ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Initiating graceful shutdown...");
    if let Err(e) = shutdown_tx.send(true) {
        error!("Failed to send shutdown signal: {}", e);
    }
    for task in [kernel_task, bridge_task, liveness_task] {
        if let Err(e) = task.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }
    info!(
        executions = kernel.execution_count(),
        clients = clients.len(),
        "Kernel shut down"
    );
    Ok(())
}
