//! apiview: API review page service.
//!
//! Entry point for the `apiview` binary. Wires together configuration
//! (`config`), the SQLite-backed stores (`apiview-core`), the page controller
//! (`page`), handlebars views (`views`) and the axum router (`routes`).
//!
//! # Startup sequence
//!
//! 1. Load config. A malformed file aborts before anything else happens.
//! 2. Install the tracing subscriber; `RUST_LOG` overrides `log_filter`.
//! 3. Create the database directory and `open_db()`, which runs migrations.
//! 4. Build the app state and bind the listener.
//! 5. Serve until Ctrl-C or SIGTERM.

mod app;
mod config;
mod error;
mod page;
mod routes;
mod views;

use tracing_subscriber::EnvFilter;

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolves when the process receives Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Step 1: config errors are printed before logging exists.
    let path = config::config_path();
    let config = config::Config::load(&path).map_err(|e| {
        eprintln!("apiview: config error in {}: {e}", path.display());
        std::io::Error::other(e)
    })?;

    // Step 2: logging.
    init_logging(&config.log_filter);
    tracing::info!(config = ?config, "config loaded");

    // Step 3: open the WAL-mode SQLite database, creating its directory.
    if let Some(parent) = std::path::Path::new(&config.database).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = apiview_core::db::open_db(&config.database)
        .await
        .map_err(std::io::Error::other)?;

    // Step 4: state and listener.
    let state = app::AppState::from_config(&config, conn).map_err(std::io::Error::other)?;
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(addr = %config.listen, database = %config.database, "apiview listening");

    // Step 5: serve until a shutdown signal arrives.
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("apiview stopped");
    Ok(())
}
