//! Connection (invitation) persistence.
//!
//! Rows are append-plus-transition only: a connection is inserted pending,
//! may move once to accepted or rejected, and is never deleted.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Connection, ConnectionState, PairStatus};

type ConnectionRow = (String, String, String, String, String, Option<String>);

pub struct ConnectionStore {
    pool: SqlitePool,
}

impl ConnectionStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                initiator_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                responded_at TEXT,
                FOREIGN KEY (initiator_id) REFERENCES users(id),
                FOREIGN KEY (target_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_connections_pair
             ON connections(initiator_id, target_id)",
        )
        .execute(&pool)
        .await?;

        info!("[Connections] store initialized");
        Ok(Self { pool })
    }

    /// Insert a pending connection for the pair. The existence check and
    /// the insert are one statement, so two racing invitations for the same
    /// pair (in either direction) cannot both commit.
    pub async fn create_pending(&self, initiator: Uuid, target: Uuid) -> Result<Connection> {
        let connection = Connection {
            id: Uuid::new_v4(),
            initiator_id: initiator,
            target_id: target,
            state: ConnectionState::Pending,
            created_at: Utc::now(),
            responded_at: None,
        };
        let created_at = connection.created_at.to_rfc3339();

        let inserted = super::retry_once(|| async {
            sqlx::query(
                r#"
                INSERT INTO connections (id, initiator_id, target_id, state, created_at)
                SELECT ?1, ?2, ?3, 'pending', ?4
                WHERE NOT EXISTS (
                    SELECT 1 FROM connections
                    WHERE state != 'rejected'
                      AND ((initiator_id = ?2 AND target_id = ?3)
                        OR (initiator_id = ?3 AND target_id = ?2))
                )
                "#,
            )
            .bind(connection.id.to_string())
            .bind(initiator.to_string())
            .bind(target.to_string())
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
        })
        .await?;

        if inserted == 0 {
            return Err(Error::DuplicateConnection);
        }

        info!("[Connections] created pending {} -> {}", initiator, target);
        Ok(connection)
    }

    pub async fn get(&self, id: Uuid) -> Result<Connection> {
        let row: Option<ConnectionRow> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT id, initiator_id, target_id, state, created_at, responded_at
                 FROM connections WHERE id = ?",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
        })
        .await?;

        row.map(row_to_connection).ok_or(Error::NotFound)
    }

    /// Move a pending connection to a terminal state. Returns false when
    /// the row is no longer pending, which a racing respond may cause
    /// between the caller's read and this write.
    pub async fn transition(&self, id: Uuid, to: ConnectionState) -> Result<bool> {
        let responded_at = Utc::now().to_rfc3339();

        let updated = super::retry_once(|| async {
            sqlx::query(
                "UPDATE connections SET state = ?, responded_at = ?
                 WHERE id = ? AND state = 'pending'",
            )
            .bind(to.as_str())
            .bind(&responded_at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
        })
        .await?;

        Ok(updated == 1)
    }

    /// Pending connections targeting this user, newest first.
    pub async fn list_pending_for(&self, target: Uuid) -> Result<Vec<Connection>> {
        let rows: Vec<ConnectionRow> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT id, initiator_id, target_id, state, created_at, responded_at
                 FROM connections
                 WHERE target_id = ? AND state = 'pending'
                 ORDER BY created_at DESC",
            )
            .bind(target.to_string())
            .fetch_all(&self.pool)
            .await
        })
        .await?;

        Ok(rows.into_iter().map(row_to_connection).collect())
    }

    /// Peers connected to this user via an accepted connection, with the
    /// connection's creation time (used as a recency stand-in for
    /// conversations that have no messages yet).
    pub async fn accepted_peers(&self, user: Uuid) -> Result<Vec<(Uuid, chrono::DateTime<Utc>)>> {
        let rows: Vec<(String, String, String)> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT initiator_id, target_id, created_at FROM connections
                 WHERE state = 'accepted' AND (initiator_id = ?1 OR target_id = ?1)",
            )
            .bind(user.to_string())
            .fetch_all(&self.pool)
            .await
        })
        .await?;

        let me = user.to_string();
        Ok(rows
            .into_iter()
            .map(|(initiator, target, created_at)| {
                let peer = if initiator == me { target } else { initiator };
                (super::parse_uuid(&peer), super::parse_timestamp(&created_at))
            })
            .collect())
    }

    /// Pair status in either direction, for search annotation. Rejected
    /// rows read as none.
    pub async fn status_between(&self, a: Uuid, b: Uuid) -> Result<PairStatus> {
        let row: Option<(String,)> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT state FROM connections
                 WHERE state != 'rejected'
                   AND ((initiator_id = ?1 AND target_id = ?2)
                     OR (initiator_id = ?2 AND target_id = ?1))
                 LIMIT 1",
            )
            .bind(a.to_string())
            .bind(b.to_string())
            .fetch_optional(&self.pool)
            .await
        })
        .await?;

        Ok(match row {
            Some((state,)) => match ConnectionState::parse(&state) {
                ConnectionState::Accepted => PairStatus::Accepted,
                _ => PairStatus::Pending,
            },
            None => PairStatus::None,
        })
    }

    /// Whether an accepted connection exists between the pair, in either
    /// direction. Gates message creation.
    pub async fn accepted_between(&self, a: Uuid, b: Uuid) -> Result<bool> {
        let row: Option<(i64,)> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT 1 FROM connections
                 WHERE state = 'accepted'
                   AND ((initiator_id = ?1 AND target_id = ?2)
                     OR (initiator_id = ?2 AND target_id = ?1))
                 LIMIT 1",
            )
            .bind(a.to_string())
            .bind(b.to_string())
            .fetch_optional(&self.pool)
            .await
        })
        .await?;

        Ok(row.is_some())
    }
}

fn row_to_connection(
    (id, initiator_id, target_id, state, created_at, responded_at): ConnectionRow,
) -> Connection {
    Connection {
        id: super::parse_uuid(&id),
        initiator_id: super::parse_uuid(&initiator_id),
        target_id: super::parse_uuid(&target_id),
        state: ConnectionState::parse(&state),
        created_at: super::parse_timestamp(&created_at),
        responded_at: responded_at.as_deref().map(super::parse_timestamp),
    }
}
