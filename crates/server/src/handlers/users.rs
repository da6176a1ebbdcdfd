//! Directory handlers: provisioning and search.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::current_user;
use crate::config::AppState;
use crate::error::Result;
use crate::models::{PairStatus, User};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

/// Search hit annotated with how the candidate relates to the caller.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub username: String,
    pub connection_status: PairStatus,
}

/// POST /users
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.directory.create_user(&req.username).await?;
    info!("POST /users -> {}", user.username);
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users/search?query=
pub async fn search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>> {
    let user = current_user(&state, &headers).await?;

    let found = state.directory.search(&params.query, user.id).await?;
    let mut results = Vec::with_capacity(found.len());
    for candidate in found {
        let connection_status = state
            .connections
            .status_between(user.id, candidate.id)
            .await?;
        results.push(SearchResult {
            id: candidate.id,
            username: candidate.username,
            connection_status,
        });
    }

    Ok(Json(results))
}
