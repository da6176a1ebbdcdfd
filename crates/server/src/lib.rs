//! Courier Messaging Server Library
//!
//! One-to-one messaging: invitations, message history, conversation
//! aggregation, and live delivery over WebSocket with poll fallback.

pub mod config;
pub mod connections;
pub mod conversations;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod models;
pub mod store;

use axum::{routing::get, routing::post, routing::put, Router};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{AppState, ServerConfig};
use connections::ConnectionService;
use conversations::ConversationAggregator;
use delivery::DeliveryRouter;
use directory::UserDirectory;
use handlers::{
    // Users
    create_user,
    // Conversations
    get_conversations,
    get_messages,
    // Invitations
    list_pending_invitations,
    // Live channel
    live_channel,
    respond_invitation,
    search_users,
    send_invitation,
};
use store::{connections::ConnectionStore, messages::MessageStore};

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Courier Server ===");
    info!("Features: Invitations | Message Store | Conversations | Live Delivery");

    // Get COURIER_ROOT from environment or default
    let courier_root = std::env::var("COURIER_ROOT")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("courier_data"));

    // Initialize configuration
    let config = ServerConfig::with_base_dir(&courier_root);
    config.ensure_dirs().await?;

    info!("Data directory: {:?}", config.data_dir);
    info!("Messenger database: {:?}", config.db_path());

    let pool = store::open_pool(&config.db_path()).await?;

    // Initialize User Directory
    let directory = Arc::new(UserDirectory::new(pool.clone()).await?);
    info!("User Directory initialized");

    // Initialize stores
    let connection_store = Arc::new(ConnectionStore::new(pool.clone()).await?);
    let message_store = Arc::new(MessageStore::new(pool.clone()).await?);
    info!("Connection and Message stores initialized");

    // Initialize Connection Service
    let connection_service = Arc::new(ConnectionService::new(
        connection_store.clone(),
        directory.clone(),
    ));
    info!("Connection Service initialized");

    // Initialize Conversation Aggregator
    let aggregator = Arc::new(ConversationAggregator::new(
        connection_store.clone(),
        message_store.clone(),
        directory.clone(),
    ));
    info!("Conversation Aggregator initialized");

    // Initialize Delivery Router
    let delivery = Arc::new(DeliveryRouter::new(
        connection_store.clone(),
        message_store.clone(),
        directory.clone(),
    ));
    info!("Delivery Router initialized");

    // Create app state
    let app_state = AppState {
        directory,
        connections: connection_service,
        conversations: aggregator,
        delivery,
        messages: message_store,
    };

    let app = router(app_state);

    // Start server
    let addr = config.bind_addr;
    info!("");
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║  Courier Server Running                                    ║");
    info!("║  Address: http://localhost:3001                            ║");
    info!("╚════════════════════════════════════════════════════════════╝");
    info!("");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Users
        .route("/users", post(create_user))
        .route("/users/search", get(search_users))
        // Invitations
        .route(
            "/invitations",
            get(list_pending_invitations).post(send_invitation),
        )
        .route("/invitations/{connection_id}", put(respond_invitation))
        // Conversations
        .route("/conversations", get(get_conversations))
        .route("/conversations/{peer_id}/messages", get(get_messages))
        // Live channel
        .route("/ws", get(live_channel))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK - Courier Server"
}
