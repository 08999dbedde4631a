//! Shutdown signalling
//!
//! A process-wide shutdown flag carried on a `watch` channel. Poll and drain
//! cycles check it between messages and entries.

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Owner of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Receiver observing the flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Request shutdown; idempotent
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Trigger shutdown when SIGTERM, SIGINT or Ctrl+C arrives
    pub fn trigger_on_signal(&self) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            controller.trigger();
        })
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether shutdown has been requested on this receiver
pub fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Wait until the flag is set (or the controller is gone)
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // An error means the sender was dropped, which also ends the engine.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or Ctrl+C)
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                signal::ctrl_c().await.ok();
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, finishing in-flight cycles...");
            }
            _ = signal::ctrl_c() => {
                info!("Received interrupt, finishing in-flight cycles...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, finishing in-flight cycles..."),
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_subscribers() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();
        assert!(!is_shutdown(&rx));

        controller.trigger();
        shutdown_requested(&mut rx).await;
        assert!(is_shutdown(&rx));
        assert!(controller.is_triggered());
    }
}
