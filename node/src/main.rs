// Copyright (c) 2026 kvchain contributors. MIT License.
// See LICENSE for details.

//! # kvchain Node
//!
//! Entry point for the `kvchain-node` binary. Resolves the home directory,
//! loads settings, initializes logging and metrics, then serves the
//! application to the consensus engine until SIGINT or SIGTERM.
//!
//! Exit status is 0 after a signal-driven shutdown and non-zero when
//! configuration, the store, or the transport fails.

mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use kvchain_protocol::home::Home;
use kvchain_protocol::supervisor::{RunMode, Supervisor, SupervisorOptions};

use cli::KvchainCli;
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KvchainCli::parse();

    // --- Configuration (before anything touches the store) ---
    let home = Home::resolve(cli.home).context("failed to resolve home directory")?;
    let settings = home
        .load_settings(false)
        .with_context(|| format!("invalid configuration in {}", home.root().display()))?;

    logging::init_logging(&settings.log_level, LogFormat::from_env());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        home = %home.root().display(),
        socket_addr = %cli.socket_addr,
        "starting kvchain-node"
    );

    let metrics_addr = settings
        .instrumentation
        .prometheus
        .then(|| settings.instrumentation.listen_addr())
        .transpose()
        .context("invalid metrics listen address")?;

    // --- Store + application ---
    let supervisor = Supervisor::bootstrap(SupervisorOptions {
        home,
        mode: RunMode::Socket {
            listen: cli.socket_addr,
        },
        settings: Some(settings),
    })
    .context("failed to bootstrap node")?;

    // --- Metrics server ---
    let metrics_task = match metrics_addr {
        Some(addr) => Some(metrics::spawn_server(addr, supervisor.app().metrics().clone()).await?),
        None => None,
    };

    // --- Serve ---
    let node = supervisor.start().await.context("failed to start transport")?;
    let outcome = node.run_until(shutdown_signal()).await;

    if let Some(task) = metrics_task {
        task.abort();
    }
    outcome.context("node stopped with an error")?;
    tracing::info!("kvchain-node stopped");
    Ok(())
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
