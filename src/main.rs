//! HTTP server for the payroll engine.
//!
//! Loads the configuration directory named by `PAYROLL_CONFIG_DIR`
//! (default `./config/acme`) and serves the API on `PORT`, falling back to
//! `server.port` from `engine.yaml`.

use payroll_engine::api::{AppState, create_router};
use payroll_engine::config::ConfigLoader;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_dir =
        std::env::var("PAYROLL_CONFIG_DIR").unwrap_or_else(|_| "./config/acme".to_string());
    let loader = ConfigLoader::load(&config_dir).map_err(|e| {
        tracing::error!("Failed to load configuration from {config_dir}: {e}");
        e
    })?;

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(loader.config().server.port);

    let app = create_router(AppState::new(loader));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Payroll engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
