use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use kelas_forum::CreateForum;
use kelas_types::api::{CreateForumRequest, CreateForumResponse};
use kelas_types::models::UserProfile;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn create_forum(
    State(state): State<AppState>,
    Extension(profile): Extension<UserProfile>,
    Json(req): Json<CreateForumRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let forum_id = state
        .provisioner
        .create_forum(CreateForum {
            name: req.name,
            kind: req.kind,
            source_class_id: req.source_class_id,
            requester: profile,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CreateForumResponse { forum_id })))
}
