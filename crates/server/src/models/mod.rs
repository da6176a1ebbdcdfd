use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered user. Owned by the directory collaborator; the core only
/// reads it for display names and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Connection lifecycle state.
///
/// `pending --accept--> accepted`, `pending --reject--> rejected`.
/// Accepted and rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Pending,
    Accepted,
    Rejected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Pending => "pending",
            ConnectionState::Accepted => "accepted",
            ConnectionState::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "accepted" => ConnectionState::Accepted,
            "rejected" => ConnectionState::Rejected,
            _ => ConnectionState::Pending,
        }
    }
}

/// A relationship request between an initiator and a target. Never
/// deleted; rejected rows stay behind as an audit trail and may be
/// superseded by a fresh pending connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub initiator_id: Uuid,
    pub target_id: Uuid,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// Pending invitation joined with the sender's username, as surfaced by
/// the invitation poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInvitation {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub created_at: DateTime<Utc>,
}

/// A single directed chat message.
///
/// `seq` is the strictly increasing store-wide ordering key and doubles as
/// the pagination cursor; `created_at` is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub seq: i64,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// How a search candidate relates to the querying user. Symmetric: both
/// sides of an undecided invitation read `pending`; a rejected connection
/// reads `none` so the pair can try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStatus {
    None,
    Pending,
    Accepted,
}

/// Derived per-peer conversation view. Recomputed on every request, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer_id: Uuid,
    pub peer_name: String,
    pub last_message_text: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: i64,
}
