//! Conversation Aggregation
//!
//! Derives the per-user conversation list from the message and connection
//! stores. Strictly read-only and recomputed on every call; unread counts
//! change on every message, so nothing here may be cached.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::directory::UserDirectory;
use crate::error::Result;
use crate::models::ConversationSummary;
use crate::store::{ConnectionStore, MessageStore};

/// Shown as the last message for peers who have not exchanged one yet.
pub const EMPTY_CONVERSATION_TEXT: &str = "Start a conversation";

pub struct ConversationAggregator {
    connections: Arc<ConnectionStore>,
    messages: Arc<MessageStore>,
    directory: Arc<UserDirectory>,
}

impl ConversationAggregator {
    pub fn new(
        connections: Arc<ConnectionStore>,
        messages: Arc<MessageStore>,
        directory: Arc<UserDirectory>,
    ) -> Self {
        Self {
            connections,
            messages,
            directory,
        }
    }

    /// One summary per peer the user is connected to or has exchanged a
    /// message with, ordered by last message recency. Peers without
    /// messages sort last, carrying the connection creation time and a
    /// sentinel text.
    pub async fn list_conversations(&self, user: Uuid) -> Result<Vec<ConversationSummary>> {
        let mut peers: HashMap<Uuid, DateTime<Utc>> = self
            .connections
            .accepted_peers(user)
            .await?
            .into_iter()
            .collect();

        // accepted connections normally cover every message peer, but the
        // union is what the conversation list is defined over
        for peer in self.messages.message_peers(user).await? {
            peers.entry(peer).or_insert_with(Utc::now);
        }

        let mut entries: Vec<(bool, ConversationSummary)> = Vec::with_capacity(peers.len());
        for (peer_id, connected_at) in peers {
            let peer = self.directory.get_user(peer_id).await?;
            let last = self.messages.last_message(user, peer_id).await?;
            let unread_count = self.messages.unread_count(user, peer_id).await?;

            let (last_message_text, last_message_at, has_messages) = match last {
                Some(message) => (message.content, message.created_at, true),
                None => (EMPTY_CONVERSATION_TEXT.to_string(), connected_at, false),
            };

            entries.push((
                has_messages,
                ConversationSummary {
                    peer_id,
                    peer_name: peer.username,
                    last_message_text,
                    last_message_at,
                    unread_count,
                },
            ));
        }

        entries.sort_by(|a, b| match (a.0, b.0) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => b.1.last_message_at.cmp(&a.1.last_message_at),
        });

        Ok(entries.into_iter().map(|(_, summary)| summary).collect())
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
        aggregator: ConversationAggregator,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("messenger.sqlite"))
            .await
            .unwrap();
        let directory = Arc::new(UserDirectory::new(pool.clone()).await.unwrap());
        let connections = Arc::new(ConnectionStore::new(pool.clone()).await.unwrap());
        let messages = Arc::new(MessageStore::new(pool).await.unwrap());
        let aggregator = ConversationAggregator::new(
            connections.clone(),
            messages.clone(),
            directory.clone(),
        );
        Fixture {
            _dir: dir,
            connections,
            messages,
            directory,
            aggregator,
        }
    }

    async fn accept(fx: &Fixture, a: Uuid, b: Uuid) {
        let conn = fx.connections.create_pending(a, b).await.unwrap();
        fx.connections
            .transition(conn.id, ConnectionState::Accepted)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recency_orders_conversations_and_quiet_peers_sort_last() {
        let fx = fixture().await;
        let alice = fx.directory.create_user("alice").await.unwrap();
        let bob = fx.directory.create_user("bob").await.unwrap();
        let carol = fx.directory.create_user("carol").await.unwrap();
        let dave = fx.directory.create_user("dave").await.unwrap();

        accept(&fx, alice.id, bob.id).await;
        accept(&fx, alice.id, carol.id).await;
        accept(&fx, dave.id, alice.id).await;

        fx.messages.append(bob.id, alice.id, "from bob").await.unwrap();
        fx.messages.append(alice.id, carol.id, "to carol").await.unwrap();

        let list = fx.aggregator.list_conversations(alice.id).await.unwrap();
        let names: Vec<_> = list.iter().map(|c| c.peer_name.as_str()).collect();
        assert_eq!(names, vec!["carol", "bob", "dave"]);

        assert_eq!(list[0].last_message_text, "to carol");
        assert_eq!(list[1].last_message_text, "from bob");
        assert_eq!(list[1].unread_count, 1);
        assert_eq!(list[2].last_message_text, EMPTY_CONVERSATION_TEXT);
        assert_eq!(list[2].unread_count, 0);
    }

    #[tokio::test]
    async fn unread_count_follows_mark_read() {
        let fx = fixture().await;
        let alice = fx.directory.create_user("alice").await.unwrap();
        let bob = fx.directory.create_user("bob").await.unwrap();
        accept(&fx, alice.id, bob.id).await;

        fx.messages.append(bob.id, alice.id, "one").await.unwrap();
        fx.messages.append(bob.id, alice.id, "two").await.unwrap();

        let list = fx.aggregator.list_conversations(alice.id).await.unwrap();
        assert_eq!(list[0].unread_count, 2);

        fx.messages.mark_read(alice.id, bob.id).await.unwrap();
        let list = fx.aggregator.list_conversations(alice.id).await.unwrap();
        assert_eq!(list[0].unread_count, 0);
        // recomputed fresh each call, so the text is still the latest
        assert_eq!(list[0].last_message_text, "two");
    }
}
