use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use partydash::config::{EngineConfig, ServerConfig};
use partydash::engine::{Engine, Scheduler};
use partydash::store::{FileCheckpointStore, MemoryStore, Stores};
use partydash::{api, prompts, trigger};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "partydash=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PartyDash...");

    let engine_config = EngineConfig::from_env();
    let server_config = ServerConfig::from_env();

    let catalog = prompts::load_prompts(&server_config.prompts_file).await;
    let store = Arc::new(MemoryStore::with_prompts(catalog));
    let mut stores = Stores::in_memory(store);

    if let Some(dir) = &engine_config.checkpoint_dir {
        match FileCheckpointStore::open(dir.clone()).await {
            Ok(checkpoints) => {
                tracing::info!("Writing round checkpoints to {}", dir.display());
                stores = stores.with_checkpoints(Arc::new(checkpoints));
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to open checkpoint directory {}: {}. Keeping checkpoints in memory.",
                    dir.display(),
                    e
                );
            }
        }
    }

    let scheduler = Scheduler::new(Engine::new(stores, engine_config));

    // Spawn background task that starts a match whenever a room is activated
    trigger::spawn_activation_trigger(scheduler.clone());

    // Pick up rooms that were mid-match when the process last stopped
    if let Err(e) = scheduler.resume_active_rooms().await {
        tracing::error!("Failed to resume active rooms: {}", e);
    }

    let app = api::router(scheduler)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
