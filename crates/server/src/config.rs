//! Server configuration and shared state

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::connections::ConnectionService;
use crate::conversations::ConversationAggregator;
use crate::delivery::DeliveryRouter;
use crate::directory::UserDirectory;
use crate::store::MessageStore;

/// Configuration for the Courier server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory holding the sqlite database
    pub data_dir: PathBuf,
    /// Bind address
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("courier_data"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
        }
    }
}

impl ServerConfig {
    /// Create config with custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("messenger.sqlite")
    }

    /// Ensure the data directory exists
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<UserDirectory>,
    pub connections: Arc<ConnectionService>,
    pub conversations: Arc<ConversationAggregator>,
    pub delivery: Arc<DeliveryRouter>,
    pub messages: Arc<MessageStore>,
}
