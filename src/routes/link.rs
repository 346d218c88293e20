use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::constants::ERR_EMPTY_CODE;
use crate::error::{AppError, Result};
use crate::models::{RoleConnection, UserLink};
use crate::publisher::PublishReport;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub success: bool,
    pub expires_at: String,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct SaveLinkResponse {
    pub success: bool,
    pub link: UserLink,
    /// Absent when the user has not authorized the chat platform yet
    pub report: Option<PublishReport>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub authorized: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteLinkResponse {
    pub success: bool,
    pub message: String,
}

/// Exchange an authorization code for a token
///
/// Called by the OAuth callback once the redirect handshake is done. A linked
/// profile is pushed right away; a failed push is logged, the token is kept.
pub async fn authorize_link(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>> {
    let code = payload.code.trim();
    if code.is_empty() {
        return Err(AppError::InvalidInput(ERR_EMPTY_CODE.to_string()));
    }

    let token = state.lifecycle.exchange_code(user_id, code).await?;

    let synced = match state.publisher.sync(user_id).await {
        Ok(_) => true,
        Err(AppError::NotFound { .. }) => {
            tracing::debug!("No linked profile for user {} yet", user_id);
            false
        }
        Err(e) => {
            tracing::warn!("Sync after authorization failed for user {}: {}", user_id, e);
            false
        }
    };

    Ok(Json(AuthorizeResponse {
        success: true,
        expires_at: token.expires_at.to_rfc3339(),
        synced,
    }))
}

/// Stored profile link for a user
pub async fn get_link(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserLink>> {
    let link = state.links.get(&user_id).await?.ok_or_else(|| AppError::NotFound {
        table: state.links.table().to_string(),
        key: user_id.to_string(),
    })?;

    Ok(Json(link))
}

/// Save (or replace) a user's profile link and publish it
///
/// Without a stored token the link is saved and the push is skipped. The body
/// is coerced into the link schema: numeric strings are accepted, missing or
/// extra fields are rejected.
pub async fn save_link(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<JsonValue>,
) -> Result<Json<SaveLinkResponse>> {
    let link = state.links.save_loose(&user_id, &payload).await?;

    tracing::info!(
        "Linked user {} to catalog profile {}",
        user_id,
        link.catalog_id
    );

    let report = match state.publisher.sync(user_id).await {
        Ok(report) => Some(report),
        Err(AppError::NotFound { .. }) => {
            tracing::debug!("User {} has no token yet, skipping sync", user_id);
            None
        }
        Err(e) => return Err(e),
    };

    Ok(Json(SaveLinkResponse {
        success: true,
        link,
        report,
    }))
}

/// Push the stored profile again
pub async fn sync_link(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<PublishReport>> {
    let report = state.publisher.sync(user_id).await?;
    Ok(Json(report))
}

/// Role connection currently stored on the chat platform
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<RoleConnection>> {
    let connection = state.publisher.fetch(user_id).await?;
    Ok(Json(connection))
}

pub async fn link_status(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<StatusResponse>> {
    let authorized = state.publisher.check_authorization(user_id).await?;
    Ok(Json(StatusResponse { authorized }))
}

/// Forget a user: profile link and token
///
/// Deleting an unknown user succeeds.
pub async fn delete_link(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<DeleteLinkResponse>> {
    state.links.delete(&user_id).await?;
    state.tokens.delete(&user_id).await?;

    tracing::info!("Removed link and token for user {}", user_id);

    Ok(Json(DeleteLinkResponse {
        success: true,
        message: "Link and token removed".to_string(),
    }))
}
