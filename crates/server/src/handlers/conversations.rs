//! Conversation handlers

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::current_user;
use crate::config::AppState;
use crate::error::Result;
use crate::models::{ConversationSummary, Message};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    /// Seq cursor: return the page of messages strictly older than this.
    pub before: Option<i64>,
}

/// GET /conversations - Derived fresh on every call.
pub async fn get_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationSummary>>> {
    let user = current_user(&state, &headers).await?;
    let conversations = state.conversations.list_conversations(user.id).await?;
    Ok(Json(conversations))
}

/// GET /conversations/{peer_id}/messages
///
/// Opening a conversation marks the peer-to-caller direction read as a
/// side effect.
pub async fn get_messages(
    Path(peer_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>> {
    let user = current_user(&state, &headers).await?;

    let messages = state
        .messages
        .history(user.id, peer_id, query.limit, query.before)
        .await?;
    state.messages.mark_read(user.id, peer_id).await?;

    Ok(Json(messages))
}
