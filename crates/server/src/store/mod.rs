//! Sqlite persistence for connections and messages.
//!
//! All stores share one pool over a single database file. Mutations rely on
//! single-statement atomicity (one sqlite writer at a time) so racing
//! operations on the same connection or message pair serialize without any
//! application-level lock.

pub mod connections;
pub mod messages;

pub use connections::ConnectionStore;
pub use messages::MessageStore;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Backoff before the single internal retry on a transient store failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Open the shared sqlite pool used by every store.
pub async fn open_pool(db_path: &Path) -> crate::error::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    Ok(SqlitePoolOptions::new().connect_with(options).await?)
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    }
}

/// Run a store operation, retrying once after a short backoff when the
/// failure looks transient (sqlite busy, pool exhaustion). Anything else
/// surfaces immediately.
pub(crate) async fn retry_once<T, F, Fut>(op: F) -> std::result::Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match op().await {
        Err(err) if is_transient(&err) => {
            warn!("[Store] transient failure, retrying once: {}", err);
            tokio::time::sleep(RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("[Store] corrupt uuid '{}': {}", raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|_| Utc::now())
}
