//! Shutdown signalling
//!
//! Every long-running loop holds a `watch::Receiver<bool>`. The value flips to
//! `true` exactly once; receivers observe it without consuming it, so one
//! sender fans out to any number of listener, send and receive loops.

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Create a manual shutdown channel (used by tests and embedders).
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Wait for SIGTERM, SIGINT or Ctrl+C.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to register signal handlers: {}", e);
                    signal::ctrl_c().await.ok();
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    }
}

/// Spawn a task that flips the returned receiver on a process signal.
pub fn create_shutdown_receiver() -> watch::Receiver<bool> {
    let (tx, rx) = shutdown_channel();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = tx.send(true);
    });

    rx
}

/// True once shutdown has been requested (or the sender is gone).
pub fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

/// Resolve once shutdown has been requested (or the sender is gone).
///
/// Cancel safe, so it can sit in a `select!` branch of a long-running loop.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
