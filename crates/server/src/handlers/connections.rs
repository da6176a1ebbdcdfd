//! Invitation handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::current_user;
use crate::config::AppState;
use crate::connections::Decision;
use crate::error::Result;
use crate::models::{Connection, PendingInvitation};

#[derive(Debug, Deserialize)]
pub struct SendInvitationRequest {
    pub target_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub decision: Decision,
}

/// POST /invitations - Send an invitation to another user
pub async fn send_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendInvitationRequest>,
) -> Result<(StatusCode, Json<Connection>)> {
    let user = current_user(&state, &headers).await?;

    let connection = state
        .connections
        .send_invitation(user.id, req.target_id)
        .await?;
    info!("Invitation sent from {} to {}", user.username, req.target_id);

    Ok((StatusCode::CREATED, Json(connection)))
}

/// GET /invitations - Pending invitations for the caller, newest first.
/// Read-only; clients poll this.
pub async fn list_pending_invitations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PendingInvitation>>> {
    let user = current_user(&state, &headers).await?;
    let pending = state.connections.list_pending(user.id).await?;
    Ok(Json(pending))
}

/// PUT /invitations/{connection_id} - Accept or reject an invitation
pub async fn respond_invitation(
    Path(connection_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RespondRequest>,
) -> Result<Json<Connection>> {
    let user = current_user(&state, &headers).await?;

    let connection = state
        .connections
        .respond(connection_id, user.id, req.decision)
        .await?;
    info!(
        "Invitation {} {} by {}",
        connection_id,
        connection.state.as_str(),
        user.username
    );

    Ok(Json(connection))
}
