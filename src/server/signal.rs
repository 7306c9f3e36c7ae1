// Signal handling module
//
// Supported signals:
// - SIGTERM: Graceful shutdown
// - SIGINT:  Graceful shutdown (Ctrl+C)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::logger;

/// Signal handler state
pub struct SignalHandler {
    /// Shutdown signal (SIGTERM, SIGINT)
    pub shutdown: Notify,
    /// Whether shutdown has been requested
    pub shutdown_requested: AtomicBool,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            shutdown: Notify::new(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Request shutdown; wakes the current or next waiter.
    pub fn trigger(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns at once if it already was.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.shutdown.notified().await;
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Start signal handlers (Unix only)
///
/// This spawns a background task that listens for termination signals
/// and triggers a graceful shutdown.
#[cfg(unix)]
pub fn start_signal_handler(handler: Arc<SignalHandler>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    logger::log_info(
        "signal",
        &format!(
            "SIGTERM/SIGINT trigger graceful shutdown (pid {})",
            std::process::id()
        ),
    );

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => logger::log_signal("SIGTERM"),
            _ = sigint.recv() => logger::log_signal("SIGINT"),
        }
        handler.trigger();
    });
    Ok(())
}

/// Windows fallback - only handles Ctrl+C
#[cfg(not(unix))]
pub fn start_signal_handler(handler: Arc<SignalHandler>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            logger::log_signal("Ctrl+C");
            handler.trigger();
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_before_wait_is_not_lost() {
        let handler = SignalHandler::new();
        handler.trigger();
        tokio::time::timeout(Duration::from_secs(1), handler.wait_for_shutdown())
            .await
            .expect("shutdown already requested");
    }

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let handler = Arc::new(SignalHandler::new());
        let waiter = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.wait_for_shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .expect("waiter did not panic");
    }
}
