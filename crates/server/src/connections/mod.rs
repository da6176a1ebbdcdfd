//! Invitation State Machine
//!
//! Enforces the connection lifecycle on top of the connection store:
//! `pending --accept--> accepted`, `pending --reject--> rejected`, both
//! terminal. At most one non-rejected connection exists per user pair.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::models::{Connection, ConnectionState, PairStatus, PendingInvitation};
use crate::store::ConnectionStore;

/// How a target answers a pending invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

pub struct ConnectionService {
    store: Arc<ConnectionStore>,
    directory: Arc<UserDirectory>,
}

impl ConnectionService {
    pub fn new(store: Arc<ConnectionStore>, directory: Arc<UserDirectory>) -> Self {
        Self { store, directory }
    }

    /// Create a pending connection from initiator to target.
    pub async fn send_invitation(&self, initiator: Uuid, target: Uuid) -> Result<Connection> {
        if initiator == target {
            return Err(Error::SelfConnection);
        }
        // unknown targets fail here rather than leaving a dangling row
        self.directory.get_user(target).await?;

        let connection = self.store.create_pending(initiator, target).await?;
        info!("[Connections] invitation sent: {} -> {}", initiator, target);
        Ok(connection)
    }

    /// Accept or reject a pending invitation. Only the target may respond,
    /// and only while the connection is still pending.
    pub async fn respond(
        &self,
        connection_id: Uuid,
        responder: Uuid,
        decision: Decision,
    ) -> Result<Connection> {
        let connection = self.store.get(connection_id).await?;

        if connection.target_id != responder {
            return Err(Error::Forbidden);
        }
        if connection.state != ConnectionState::Pending {
            return Err(Error::InvalidTransition);
        }

        let to = match decision {
            Decision::Accept => ConnectionState::Accepted,
            Decision::Reject => ConnectionState::Rejected,
        };

        // A concurrent respond may have slipped in between the read above
        // and this conditional update; the store tells us who won.
        if !self.store.transition(connection_id, to).await? {
            return Err(Error::InvalidTransition);
        }

        info!("[Connections] {} {}", connection_id, to.as_str());
        self.store.get(connection_id).await
    }

    /// Pending invitations targeting this user, newest first, joined with
    /// sender usernames. Read-only and idempotent: safe to poll.
    pub async fn list_pending(&self, user: Uuid) -> Result<Vec<PendingInvitation>> {
        let connections = self.store.list_pending_for(user).await?;

        let mut invitations = Vec::with_capacity(connections.len());
        for connection in connections {
            let sender = self.directory.get_user(connection.initiator_id).await?;
            invitations.push(PendingInvitation {
                id: connection.id,
                sender_id: connection.initiator_id,
                sender_username: sender.username,
                created_at: connection.created_at,
            });
        }
        Ok(invitations)
    }

    pub async fn status_between(&self, a: Uuid, b: Uuid) -> Result<PairStatus> {
        self.store.status_between(a, b).await
    }
}
