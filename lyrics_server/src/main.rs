//! Lyric Replacer Server: song processing service.
//!
//! Accepts YouTube or Spotify links, downloads the track, separates it into
//! stems, transcribes the vocals and describes each stem. Processing runs in
//! a background executor; results are stored in PostgreSQL and served over
//! HTTP together with lyric rewriting and a music chatbot.

mod analytics;
mod config;
mod dashboard;
mod db;
mod error;
mod metrics;
mod models;
mod routes;
mod schema;
mod services;

use std::net::SocketAddr;

use clap::Parser;

#[derive(Parser)]
#[command(name = "lyric-replacer", about = "AI Lyrics Replacer server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum database connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "10")]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    tracing::info!("Starting Lyric Replacer Server...");

    let app_config = config::AppConfig::from_env()?;
    let pool = db::build_pool(&cli.database_url, cli.max_connections)?;

    // Create tables
    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        tracing::info!("Running database migration...");
        db::run_migration(&mut conn).await?;
        tracing::info!("Database migration completed.");
    }

    tokio::fs::create_dir_all(&app_config.workspace_dir).await?;
    if let config::StorageConfig::Local { dir, .. } = &app_config.storage {
        tokio::fs::create_dir_all(dir).await?;
    }

    let state = routes::AppState::new(pool, app_config)?;

    // Background job executor
    tokio::spawn(services::executor::run_executor(state.pipeline()));

    let app = routes::app_router(state);

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Lyric Replacer Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines; the filter comes from `RUST_LOG`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
