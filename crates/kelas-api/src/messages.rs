use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kelas_forum::can_post;
use kelas_types::api::SendMessageRequest;
use kelas_types::models::UserProfile;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn get_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Extension(profile): Extension<UserProfile>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state.directory.channel_for(&profile, &channel_id).await?;
    let feed = state.messages.feed(&channel.id).await?;
    Ok(Json(feed))
}

/// Posting is gated the same way the compose box is: locked channels only
/// take new threads from teachers and admins, replies from anyone. Channels
/// the caller cannot see answer 404 like missing ones.
pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Extension(profile): Extension<UserProfile>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state.directory.channel_for(&profile, &channel_id).await?;

    if !can_post(&channel, profile.role, req.reply_to.is_some()) {
        return Err(ApiError::Forbidden("only teachers and admins may start threads here"));
    }

    let message = state
        .messages
        .send(&channel.id, &req.content, &profile, req.reply_to.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
