mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use pinwall_api::state::{AppState, AppStateInner};
use pinwall_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pinwall=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database, provisions every table
    let db = Database::open(&config.db_path)?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        admin_api_key: config.admin_api_key.clone(),
        owner_fallback_id: config.owner_fallback_id,
    });

    info!("Allowed origins: {}", config.allowed_origins.join(", "));
    let app = pinwall_api::router(state, &config.allowed_origins);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Pinwall server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
