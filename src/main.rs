//! Switchboard - pairing and WebRTC signaling relay

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::{
    config::{Args, DisconnectPolicy},
    db::MongoClient,
    engine::Engine,
    server,
    store::{
        CallRepository, MemoryCallRepo, MemoryDirectory, MongoCallRepo, MongoDirectory,
        UserDirectory,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("switchboard={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Switchboard - Signaling Relay");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    match args.disconnect_policy {
        DisconnectPolicy::Immediate => info!("Disconnect policy: immediate release"),
        DisconnectPolicy::Grace => info!(
            "Disconnect policy: grace period ({}s)",
            args.disconnect_grace_secs
        ),
    }
    info!("Max clients: {}", args.max_clients());
    info!("MongoDB: {}", args.mongodb_uri);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!(
                    "MongoDB connection failed (dev mode, continuing with in-memory stores): {}",
                    e
                );
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let (directory, call_repo): (Arc<dyn UserDirectory>, Arc<dyn CallRepository>) = match &mongo {
        Some(client) => (
            Arc::new(MongoDirectory::new(client).await?),
            Arc::new(MongoCallRepo::new(client).await?),
        ),
        None => (
            Arc::new(MemoryDirectory::new()),
            Arc::new(MemoryCallRepo::new()),
        ),
    };

    let engine = Arc::new(Engine::new(
        Arc::clone(&directory),
        call_repo,
        args.disconnect_policy,
        args.grace_period(),
    ));

    let state = Arc::new(server::AppState::new(args, engine, directory));
    server::run(state).await?;

    Ok(())
}
