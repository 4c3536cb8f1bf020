//! Daemon lifecycle: startup, reaper, metrics server, signal-driven shutdown

use anyhow::{Context, Result};
use cryptnote_core::config::CryptnoteConfig;
use cryptnote_reveal::{bootstrap, ExpiryReaper, NoteMetrics};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::metrics::{self, HealthState};

pub async fn run(config: CryptnoteConfig) -> Result<()> {
    info!("daemon starting");

    let mut registry = Registry::default();
    let note_metrics = NoteMetrics::new(&mut registry);

    // Server key derivation is a full Argon2id run; keep it off the runtime.
    let service = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || bootstrap::build_service(&config, note_metrics))
            .await
            .context("startup task panicked")?
            .context("building note service")?
    };

    match service.stats().await {
        Ok(stats) => info!(
            total = stats.total,
            active = stats.active,
            revealed = stats.revealed,
            expired_unread = stats.expired_unread,
            "note store ready"
        ),
        Err(e) => warn!("note store stats unavailable: {e}"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Expiry reaper
    let reaper = if config.reaper.enabled {
        let reaper = ExpiryReaper::new(
            Arc::clone(&service),
            Duration::from_secs(config.reaper.interval_secs.max(1)),
            config.reaper.batch_limit,
        );
        Some(reaper.spawn(shutdown_rx.clone()))
    } else {
        warn!("reaper disabled: overdue notes are only closed when visited");
        None
    };

    // Prometheus metrics endpoint
    let server = config.daemon.metrics_addr.clone().map(|addr| {
        let state = HealthState {
            registry: Arc::new(registry),
            service: Arc::clone(&service),
        };
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, state, rx).await {
                error!("metrics server failed: {e}");
            }
        })
    });

    notify_ready();

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    let _ = shutdown_tx.send(true);
    for handle in [reaper, server].into_iter().flatten() {
        if let Err(e) = handle.await {
            warn!("task did not shut down cleanly: {e}");
        }
    }

    info!("daemon exiting cleanly");
    Ok(())
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
