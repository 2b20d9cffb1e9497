use serde::{Deserialize, Serialize};

use crate::models::{ClassId, ForumId, ForumKind, MessageId, UserId};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
/// Tokens are minted by the external auth subsystem; `sub` is the profile uid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub exp: usize,
}

// -- Forums --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateForumRequest {
    pub name: String,
    pub kind: ForumKind,
    pub source_class_id: Option<ClassId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateForumResponse {
    pub forum_id: ForumId,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    pub reply_to: Option<MessageId>,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
