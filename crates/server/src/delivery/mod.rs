//! Live Delivery
//!
//! Owns the mapping from user identity to at most one live channel and
//! routes newly created messages to the recipient's channel when one is
//! open. Without a channel the message simply waits in the store for the
//! next poll; the push is best-effort and never blocks or fails the
//! sender.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::models::Message;
use crate::store::{ConnectionStore, MessageStore};

/// Events pushed server-to-client over a live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once when the channel opens.
    Ready { user_id: Uuid, username: String },

    /// A message addressed to this user was just persisted.
    NewMessage {
        sender_id: Uuid,
        sender_name: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Echo of the caller's own message back to them for local rendering.
    MessageSent { message: Message },

    /// A user's live channel opened or closed.
    UserStatus { user_id: Uuid, online: bool },

    /// A channel-borne request failed; the kind mirrors the HTTP error
    /// taxonomy.
    Error { kind: String, message: String },
}

/// Commands a client sends over its live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    PrivateMessage { receiver_id: Uuid, message: String },
}

/// One registered live channel. A fresh registration for the same user
/// replaces the previous entry; conn_id lets a stale disconnect detect
/// that it no longer owns the slot.
struct LiveChannel {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

pub struct DeliveryRouter {
    connections: Arc<ConnectionStore>,
    messages: Arc<MessageStore>,
    directory: Arc<UserDirectory>,
    channels: DashMap<Uuid, LiveChannel>,
}

impl DeliveryRouter {
    pub fn new(
        connections: Arc<ConnectionStore>,
        messages: Arc<MessageStore>,
        directory: Arc<UserDirectory>,
    ) -> Self {
        Self {
            connections,
            messages,
            directory,
            channels: DashMap::new(),
        }
    }

    /// Register a live channel for a user, replacing and thereby
    /// invalidating any previous one. Returns the connection id and the
    /// event receiver to drain into the transport.
    pub fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(user_id, LiveChannel { conn_id, tx });

        info!("[Delivery] channel registered for {}", user_id);
        self.broadcast(ServerEvent::UserStatus {
            user_id,
            online: true,
        });
        (conn_id, rx)
    }

    /// Drop a user's channel, but only if conn_id still owns the slot — a
    /// replacement registration must not be torn down by the old
    /// connection's disconnect. Safe to call when nothing is registered.
    pub fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let removed = self
            .channels
            .remove_if(&user_id, |_, channel| channel.conn_id == conn_id)
            .is_some();

        if removed {
            info!("[Delivery] channel unregistered for {}", user_id);
            self.broadcast(ServerEvent::UserStatus {
                user_id,
                online: false,
            });
        }
    }

    pub fn is_registered(&self, user_id: Uuid) -> bool {
        self.channels.contains_key(&user_id)
    }

    /// Best-effort push to one user's channel. Returns whether the channel
    /// existed and accepted the event.
    pub fn push(&self, user_id: Uuid, event: ServerEvent) -> bool {
        match self.channels.get(&user_id) {
            Some(channel) => channel.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Best-effort fan-out to every open channel.
    fn broadcast(&self, event: ServerEvent) {
        for channel in self.channels.iter() {
            let _ = channel.tx.send(event.clone());
        }
    }

    /// Persist a message and push it to the receiver's live channel if one
    /// is open. Persistence failures surface; push failures are logged and
    /// swallowed since the message is already durable and reachable by
    /// poll.
    pub async fn send(&self, sender_id: Uuid, receiver_id: Uuid, content: &str) -> Result<Message> {
        if !self
            .connections
            .accepted_between(sender_id, receiver_id)
            .await?
        {
            return Err(Error::NotConnected);
        }

        let message = self.messages.append(sender_id, receiver_id, content).await?;

        match self.directory.get_user(sender_id).await {
            Ok(sender) => {
                let delivered = self.push(
                    receiver_id,
                    ServerEvent::NewMessage {
                        sender_id,
                        sender_name: sender.username,
                        message: message.content.clone(),
                        timestamp: message.created_at,
                    },
                );
                if delivered {
                    info!("[Delivery] pushed message {} to {}", message.id, receiver_id);
                } else {
                    debug!(
                        "[Delivery] no live channel for {}, message {} waits for poll",
                        receiver_id, message.id
                    );
                }
            }
            Err(err) => {
                warn!(
                    "[Delivery] skipping push for message {}: {}",
                    message.id, err
                );
            }
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionState;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        connections: Arc<ConnectionStore>,
        messages: Arc<MessageStore>,
        directory: Arc<UserDirectory>,
        router: DeliveryRouter,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("messenger.sqlite"))
            .await
            .unwrap();
        let directory = Arc::new(UserDirectory::new(pool.clone()).await.unwrap());
        let connections = Arc::new(ConnectionStore::new(pool.clone()).await.unwrap());
        let messages = Arc::new(MessageStore::new(pool).await.unwrap());
        let router = DeliveryRouter::new(
            connections.clone(),
            messages.clone(),
            directory.clone(),
        );
        Fixture {
            _dir: dir,
            connections,
            messages,
            directory,
            router,
        }
    }

    async fn connect_pair(fx: &Fixture, a: Uuid, b: Uuid) {
        let conn = fx.connections.create_pending(a, b).await.unwrap();
        fx.connections
            .transition(conn.id, ConnectionState::Accepted)
            .await
            .unwrap();
    }

    async fn next_new_message(
        rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
    ) -> (Uuid, String, String) {
        loop {
            match rx.recv().await.expect("channel closed early") {
                ServerEvent::NewMessage {
                    sender_id,
                    sender_name,
                    message,
                    ..
                } => return (sender_id, sender_name, message),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn send_requires_an_accepted_connection() {
        let fx = fixture().await;
        let alice = fx.directory.create_user("alice").await.unwrap();
        let bob = fx.directory.create_user("bob").await.unwrap();

        assert!(matches!(
            fx.router.send(alice.id, bob.id, "hi").await,
            Err(Error::NotConnected)
        ));

        // still pending: not enough
        fx.connections.create_pending(alice.id, bob.id).await.unwrap();
        assert!(matches!(
            fx.router.send(alice.id, bob.id, "hi").await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn send_pushes_to_a_registered_channel() {
        let fx = fixture().await;
        let alice = fx.directory.create_user("alice").await.unwrap();
        let bob = fx.directory.create_user("bob").await.unwrap();
        connect_pair(&fx, alice.id, bob.id).await;

        let (_conn_id, mut rx) = fx.router.register(bob.id);

        let stored = fx.router.send(alice.id, bob.id, "hi").await.unwrap();
        assert_eq!(stored.content, "hi");

        let (sender_id, sender_name, message) = next_new_message(&mut rx).await;
        assert_eq!(sender_id, alice.id);
        assert_eq!(sender_name, "alice");
        assert_eq!(message, "hi");
    }

    #[tokio::test]
    async fn send_without_a_channel_waits_for_poll() {
        let fx = fixture().await;
        let alice = fx.directory.create_user("alice").await.unwrap();
        let bob = fx.directory.create_user("bob").await.unwrap();
        connect_pair(&fx, alice.id, bob.id).await;

        fx.router.send(alice.id, bob.id, "hi").await.unwrap();

        assert_eq!(fx.messages.unread_count(bob.id, alice.id).await.unwrap(), 1);
        let history = fx.messages.history(alice.id, bob.id, None, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn blank_content_is_refused_and_not_persisted() {
        let fx = fixture().await;
        let alice = fx.directory.create_user("alice").await.unwrap();
        let bob = fx.directory.create_user("bob").await.unwrap();
        connect_pair(&fx, alice.id, bob.id).await;

        assert!(matches!(
            fx.router.send(alice.id, bob.id, "   ").await,
            Err(Error::EmptyContent)
        ));
        assert!(fx
            .messages
            .history(alice.id, bob.id, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn re_registering_replaces_the_previous_channel() {
        let fx = fixture().await;
        let alice = fx.directory.create_user("alice").await.unwrap();
        let bob = fx.directory.create_user("bob").await.unwrap();
        connect_pair(&fx, alice.id, bob.id).await;

        let (old_conn, mut old_rx) = fx.router.register(bob.id);
        let (_new_conn, mut new_rx) = fx.router.register(bob.id);

        fx.router.send(alice.id, bob.id, "to the new channel").await.unwrap();

        let (_, _, message) = next_new_message(&mut new_rx).await;
        assert_eq!(message, "to the new channel");

        // old receiver drains its backlog and then closes
        while let Some(event) = old_rx.recv().await {
            assert!(!matches!(event, ServerEvent::NewMessage { .. }));
        }

        // the stale disconnect must not tear down the replacement
        fx.router.unregister(bob.id, old_conn);
        assert!(fx.router.is_registered(bob.id));
    }

    #[tokio::test]
    async fn unregister_is_safe_without_a_registration() {
        let fx = fixture().await;
        fx.router.unregister(Uuid::new_v4(), Uuid::new_v4());
    }
}
