use std::sync::Arc;

use clap::Parser;
use somnus_core::{HttpNotifier, SessionStore, SomnusConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use somnus_server::{server, BotState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "somnus.toml")]
    config: String,

    /// Create an empty session datafile if none exists yet.
    #[arg(long)]
    init_store: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match SomnusConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if let Err(e) = config.validate() {
        eprintln!("Invalid config in {}: {}", args.config, e);
        std::process::exit(1);
    }

    let datafile = config.store.datafile_path();
    if args.init_store {
        match SessionStore::init_file(&datafile).await {
            Ok(true) => tracing::info!("Created empty session store at {}", datafile.display()),
            Ok(false) => tracing::info!("Session store already exists at {}", datafile.display()),
            Err(e) => {
                eprintln!("Failed to create session store: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Load sessions; a missing or corrupt store aborts startup
    let store = match SessionStore::open(&datafile, config.store.cancel_policy).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to open session store: {}", e);
            std::process::exit(1);
        }
    };

    let notifier = HttpNotifier::new(config.notifier.clone())?;
    let state = Arc::new(BotState::new(store, Arc::new(notifier), config));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Poll daemon
    let daemon = tokio::spawn(somnus_server::subsystems::poll::run_poll_daemon(
        state.clone(),
        tx.subscribe(),
    ));

    // HTTP API, if enabled
    let http = if state.config.http.enabled {
        let http_state = state.clone();
        let http_shutdown = tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = somnus_server::http::start_http_server(http_state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    let socket_path = state.config.service.socket_path.clone();
    let served = server::run_unix_server(&socket_path, state.clone(), tx.subscribe()).await;
    if served.is_err() {
        // make sure the other tasks wind down too
        let _ = tx.send(());
    }

    if let Err(e) = daemon.await {
        tracing::error!("Poll daemon task failed: {}", e);
    }
    if let Some(handle) = http {
        let _ = handle.await;
    }

    // Final checkpoint before the relay client is dropped
    match state.store.persist().await {
        Ok(()) => tracing::info!("Session store saved"),
        Err(e) => tracing::error!(error = %e, "Final save failed"),
    }

    served
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
