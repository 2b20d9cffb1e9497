pub mod auth;
pub mod channels;
pub mod error;
pub mod forums;
pub mod messages;
pub mod middleware;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use crate::auth::AppState;
use crate::middleware::require_auth;

/// REST routes. Everything but `/health` requires a bearer token whose
/// subject has a profile.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/forums", post(forums::create_forum))
        .route("/channels", get(channels::list_channels))
        .route(
            "/channels/{channel_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/me/tenant", get(channels::my_tenant))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(protected)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
