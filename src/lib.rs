pub mod allocator;
pub mod command_set;
pub mod config;
pub mod error;
pub mod hardware;
pub mod instance;
pub mod logs;
pub mod orchestrator;
pub mod paths;
pub mod ports;
pub mod process;
pub mod server;
pub mod store;
pub mod validation;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use config::{load_config_from_disk, AppConfig};
pub use error::{AppError, ErrorKind, Result};
use orchestrator::Orchestrator;
use process::{PythonScripts, WorkerEvent};
use server::AppState;
use store::Store;

#[allow(clippy::expect_used)]
pub fn run() {
    paths::ensure_data_dirs().expect("Failed to create data directories");
    let config = load_config_from_disk(&paths::config_path()).expect("Failed to load config");

    env_logger::Builder::new()
        .filter_level(config.log_filter())
        .parse_default_env()
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    if let Err(e) = runtime.block_on(serve(config)) {
        log::error!("Orchestrator failed: {}", e);
        std::process::exit(1);
    }
}

/// Open the store, bring persisted state in line with reality and serve the
/// HTTP API until Ctrl-C. All workers are killed on the way out.
pub async fn serve(config: AppConfig) -> Result<()> {
    let store = Arc::new(Store::open(paths::state_path())?);
    log::info!("Using state file {}", store.path().display());
    let resolver = Arc::new(PythonScripts {
        python: config.python.clone(),
        scripts_dir: config.scripts_dir(),
        work_dir: config.work_dir(),
    });

    let orchestrator = Arc::new(Orchestrator::new(store, resolver));
    orchestrator.seed_defaults()?;
    orchestrator.reconcile()?;
    spawn_event_logger(orchestrator.subscribe());

    let state = Arc::new(AppState {
        orchestrator: Arc::clone(&orchestrator),
        work_dir: config.work_dir(),
    });

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::io(format!("Failed to bind {}: {}", addr, e)))?;
    log::info!("Listening on http://{}", addr);

    let served = axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    log::info!("Application exiting, stopping all instances...");
    orchestrator.shutdown();

    served.map_err(|e| AppError::io(format!("HTTP server failed: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn spawn_event_logger(mut rx: broadcast::Receiver<WorkerEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => log::debug!("Worker event: {}", line),
                    Err(e) => log::warn!("Failed to encode worker event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Worker event listener lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
