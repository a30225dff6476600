use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use substream_api::{AppState, DevCallerResolver};
use substream_core::{
    bootstrap::{init_database, init_services, load_config},
    logging,
};

#[derive(Debug, Parser)]
#[command(name = "substream", about = "Ingress provisioning control plane")]
struct Args {
    /// Path to the configuration file (overrides the default search order)
    #[arg(long, env = "SUBSTREAM_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration (load_config validates and fails fast)
    if let Some(path) = &args.config {
        std::env::set_var("SUBSTREAM_CONFIG_PATH", path);
    }
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Substream server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize database and run migrations
    let pool = init_database(&config).await?;
    sqlx::migrate!("../migrations").run(&pool).await?;

    // 4. Initialize services
    let services = init_services(pool, &config).await?;

    // 5. Warm the stage pool; a failed prefix scan is fatal, since the
    //    process would otherwise leak its previously created stages
    services.stage_pool.initialize().await?;

    // 6. Serve
    let state = AppState::new(&services, Arc::new(DevCallerResolver));
    let router = substream_api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
    info!("Listening on {}", listener.local_addr()?);

    let stage_pool = Arc::clone(&services.stage_pool);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutdown signal received");
        })
        .await?;

    // 7. Stop background work; in-use stages are left for recovery on the
    //    next boot's prefix scan
    stage_pool.shutdown();
    info!("Substream server stopped");
    Ok(())
}
