use std::sync::Arc;
use std::time::Duration;

use tcp_bootstrap::config::{Config, DEFAULT_CONFIG_PATH};
use tcp_bootstrap::handler::EchoInitializer;
use tcp_bootstrap::logger;
use tcp_bootstrap::server::signal::{start_signal_handler, SignalHandler};
use tcp_bootstrap::server::{BindController, EventLoopPool};
use tcp_bootstrap::BootstrapError;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional first argument: config file path (without extension)
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = Config::load_from(&config_path)?;
    logger::init(&cfg.logging)?;

    // The pools own their threads; this runtime only drives startup,
    // signal handling and shutdown.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    logger::log_server_start(&cfg);

    // Everything that can fail without threads running happens first.
    let server = Arc::new(cfg.to_server_configuration()?);
    if cfg.server.port == 0 {
        return Err(BootstrapError::InvalidPort(0).into());
    }
    let signals = Arc::new(SignalHandler::new());
    start_signal_handler(Arc::clone(&signals))?;

    let timeout = cfg.shutdown_timeout();
    let acceptors = Arc::new(start_pool("acceptor", cfg.server.acceptor_threads)?);
    let workers = match start_pool("worker", cfg.worker_threads()) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            acceptors.shutdown_gracefully(timeout).await;
            return Err(e.into());
        }
    };

    let controller = BindController::new(
        Arc::clone(&acceptors),
        Arc::clone(&workers),
        server,
        Arc::new(EchoInitializer),
    )
    .with_policy(cfg.retry_policy());

    let failure = match controller.attempt_bind(cfg.server.port) {
        // Shutdown must be reachable while the port search is still running.
        Ok(handle) => tokio::select! {
            result = handle.wait() => match result {
                Ok(addr) => {
                    logger::log_info("server", &format!("Listening on: {addr}"));
                    signals.wait_for_shutdown().await;
                    None
                }
                Err(e) => Some(e),
            },
            () = signals.wait_for_shutdown() => None,
        },
        Err(e) => Some(e),
    };
    if let Some(ref e) = failure {
        logger::log_bind_stopped(e);
    }

    shutdown(&acceptors, &workers, timeout).await;

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn start_pool(name: &str, size: usize) -> Result<EventLoopPool, BootstrapError> {
    EventLoopPool::start(name, size).inspect_err(|e| {
        if e.is_fatal() {
            logger::log_error("server", &format!("Fatal: {e}"));
        }
    })
}

/// Stop accepting first, then drain the connections already accepted.
async fn shutdown(acceptors: &EventLoopPool, workers: &EventLoopPool, timeout: Duration) {
    acceptors.shutdown_gracefully(timeout).await;
    workers.shutdown_gracefully(timeout).await;
    logger::log_info("server", "Shutdown complete");
}
