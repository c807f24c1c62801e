mod api;
mod batch;
mod board;
mod browser;
mod config;
mod cookies;
mod csv_sink;
mod dom;
mod engine;
mod error;
mod extractor;
mod filter;
mod navigator;
mod observer;
mod pacing;
mod records;
mod selectors;
mod session;
#[cfg(test)]
mod testing;

use dotenv::dotenv;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::browser::ChromeLauncher;
use crate::config::Settings;
use crate::csv_sink::CsvSink;
use crate::engine::ScrapeEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    settings.ensure_dirs()?;

    let launcher = Arc::new(ChromeLauncher {
        headless: settings.session.headless,
        chrome_path: settings.session.chrome_path.clone(),
    });
    let port = settings.port;
    let static_dir = settings.static_dir.clone();
    let csv = CsvSink::new(settings.outputs_dir.clone());
    let engine = ScrapeEngine::new(settings, launcher)?;

    let state = Arc::new(api::AppState::new(engine, csv));
    let app = api::router(state.clone()).fallback_service(ServeDir::new(static_dir)); // Serve Dashboard

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("⚠️ Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("🛑 Shutting down, closing browser session");
    state.cancel.lock().unwrap_or_else(|p| p.into_inner()).cancel();
    state.engine.lock().await.close().await;
    Ok(())
}
