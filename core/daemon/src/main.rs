//! Pitwall daemon entrypoint.
//!
//! Owns the live session table, the persisted stats and the dashboard
//! broadcast. The monitor pushes session snapshots and lifecycle events over a
//! Unix socket; dashboards connect to the same socket and `subscribe` to the
//! frame stream.

use fs_err as fs;
use std::env;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pitwall_core::{load_config, PitwallConfig, PitwallEngine, StorageConfig};

mod ipc;
mod subscriber;

#[tokio::main]
async fn main() {
    init_logging();

    let storage = match StorageConfig::discover() {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "Failed to resolve pitwall directory");
            std::process::exit(1);
        }
    };

    if let Err(err) = storage.ensure_dirs() {
        error!(error = %err, path = %storage.root().display(), "Failed to create pitwall directory");
        std::process::exit(1);
    }

    let config = match load_config(&storage.config_file()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            PitwallConfig::default()
        }
    };

    let cancel = CancellationToken::new();
    let (engine, tasks) = match PitwallEngine::open(&storage, &config, cancel.clone()) {
        Ok(opened) => opened,
        Err(err) => {
            error!(error = %err, "Failed to start engine");
            std::process::exit(1);
        }
    };
    let engine = Arc::new(engine);

    let socket_path = storage.socket_file();
    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        season = %engine.health().season,
        "Pitwall daemon started"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(ipc::handle_connection(stream, Arc::clone(&engine)));
                }
                Err(err) => {
                    warn!(error = %err, "Failed to accept daemon connection");
                }
            },
        }
    }

    drop(listener);
    cancel.cancel();
    tasks.join().await;

    if let Err(err) = remove_existing_socket(&socket_path) {
        warn!(error = %err, "Failed to remove daemon socket");
    }
    info!("Pitwall daemon stopped");
}

fn init_logging() {
    let debug_enabled = env::var("PITWALL_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}
