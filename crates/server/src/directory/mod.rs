//! User Directory
//!
//! Concrete surface for the external identity collaborator: user
//! provisioning, id-to-display-name lookup, and username search.
//! Authentication and sessions live outside the core; handlers only check
//! that a presented id exists here.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::User;
use crate::store;

pub struct UserDirectory {
    pool: SqlitePool,
}

impl UserDirectory {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!("[Directory] initialized");
        Ok(Self { pool })
    }

    /// Register a new user.
    pub async fn create_user(&self, username: &str) -> Result<User> {
        let username = username.trim();

        let existing: Option<(String,)> = store::retry_once(|| async {
            sqlx::query_as("SELECT id FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
        })
        .await?;

        if existing.is_some() {
            return Err(Error::UsernameTaken);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: Utc::now(),
        };
        let created_at = user.created_at.to_rfc3339();

        store::retry_once(|| async {
            sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
                .bind(user.id.to_string())
                .bind(&user.username)
                .bind(&created_at)
                .execute(&self.pool)
                .await
        })
        .await?;

        info!("[Directory] user registered: {}", user.username);
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        let row: Option<(String, String, String)> = store::retry_once(|| async {
            sqlx::query_as("SELECT id, username, created_at FROM users WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
        })
        .await?;

        row.map(row_to_user).ok_or(Error::UserNotFound)
    }

    /// Case-insensitive substring search over usernames, excluding the
    /// caller. An empty query matches nobody.
    pub async fn search(&self, query: &str, excluding: Uuid) -> Result<Vec<User>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", query);
        let rows: Vec<(String, String, String)> = store::retry_once(|| async {
            sqlx::query_as(
                "SELECT id, username, created_at FROM users
                 WHERE username LIKE ? AND id != ?
                 ORDER BY username",
            )
            .bind(&pattern)
            .bind(excluding.to_string())
            .fetch_all(&self.pool)
            .await
        })
        .await?;

        Ok(rows.into_iter().map(row_to_user).collect())
    }
}

fn row_to_user((id, username, created_at): (String, String, String)) -> User {
    User {
        id: store::parse_uuid(&id),
        username,
        created_at: store::parse_timestamp(&created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn directory() -> (TempDir, UserDirectory) {
        let dir = TempDir::new().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("messenger.sqlite"))
            .await
            .unwrap();
        let directory = UserDirectory::new(pool).await.unwrap();
        (dir, directory)
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let (_dir, directory) = directory().await;

        directory.create_user("alice").await.unwrap();
        assert!(matches!(
            directory.create_user("alice").await,
            Err(Error::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn search_excludes_caller_and_empty_query_matches_nobody() {
        let (_dir, directory) = directory().await;

        let alice = directory.create_user("alice").await.unwrap();
        directory.create_user("alina").await.unwrap();
        directory.create_user("bob").await.unwrap();

        let found = directory.search("ali", alice.id).await.unwrap();
        let names: Vec<_> = found.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alina"]);

        assert!(directory.search("", alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_user_fails_for_unknown_id() {
        let (_dir, directory) = directory().await;
        assert!(matches!(
            directory.get_user(Uuid::new_v4()).await,
            Err(Error::UserNotFound)
        ));
    }
}
