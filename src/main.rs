//! redkit server binary.
//!
//! Serves uploads into the chroot and flat upload roots, kit exports, and the static `/bin/`
//! directory over HTTP.

use api_rest::{router, AppState};
use redkit_core::CoreConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the redkit server
///
/// # Environment Variables
/// - `REDKIT_REST_ADDR`: Server address (default: "0.0.0.0:8080")
/// - `REDKIT_CHROOT_DIR`: Chroot upload root (default: "chroot")
/// - `REDKIT_UPLOADS_DIR`: Flat upload root (default: "uploads")
/// - `REDKIT_KITS_DIR`: Kits directory (default: "kits")
/// - `REDKIT_BIN_DIR`: Directory served under `/bin/` (default: "bin")
/// - `REDKIT_UPLOAD_LIMIT_BYTES`: Upload request body limit (default: 1 GiB)
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is invalid or a root directory cannot be created,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redkit_run=info".parse()?)
                .add_directive("redkit_core=info".parse()?)
                .add_directive("redkit_files=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = CoreConfig::from_env()?;
    let state = AppState::new(&cfg)?;

    tracing::info!("++ Starting redkit REST on {}", cfg.rest_addr());
    tracing::info!(
        "++ chroot={} uploads={} kits={} bin={}",
        cfg.chroot_dir().display(),
        cfg.uploads_dir().display(),
        cfg.kits_dir().display(),
        cfg.bin_dir().display()
    );

    let listener = tokio::net::TcpListener::bind(cfg.rest_addr()).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("-- Shutting down redkit REST");
}
