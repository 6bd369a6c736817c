use std::net::SocketAddr;

use anyhow::Context;
use report_fill::config::AppConfig;
use report_fill::routes::{router, AppState};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().context("reading configuration")?;
    tracing::info!(
        dirs = ?config.template_dirs,
        prefix = %config.template_prefix,
        default_combo = %config.default_combo,
        "📁 Template lookup configured"
    );
    if config.font_path.is_none() {
        tracing::info!("🔤 No FONT_PATH set, using Helvetica");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("👋 Shutting down");
}
