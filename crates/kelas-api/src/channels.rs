use axum::{Extension, Json, extract::State, response::IntoResponse};

use kelas_types::models::UserProfile;

use crate::auth::AppState;
use crate::error::ApiError;

/// Grouped directory for the caller. Query failures come back as an empty
/// directory with `error` set, not as an error status.
pub async fn list_channels(
    State(state): State<AppState>,
    Extension(profile): Extension<UserProfile>,
) -> impl IntoResponse {
    Json(state.directory.snapshot(&profile).await)
}

pub async fn my_tenant(
    State(state): State<AppState>,
    Extension(profile): Extension<UserProfile>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = state.tenants.resolve(&profile.uid).await?;
    Ok(Json(tenant))
}
