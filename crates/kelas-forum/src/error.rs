use thiserror::Error;

/// Creating a forum failed. Nothing was written; retry the whole request.
#[derive(Debug, Error)]
pub enum ProvisionFailure {
    #[error("forum name must not be empty")]
    InvalidName,

    #[error("could not load roster for class '{class_id}'")]
    Roster {
        class_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The forum id, or one of its channel ids, is owned by another tenant.
    #[error("forum '{0}' already exists in another school")]
    TenantConflict(String),

    #[error("forum write failed")]
    Store(#[source] anyhow::Error),
}

/// A message could not be written. The caller keeps its draft.
#[derive(Debug, Error)]
pub enum SendFailure {
    #[error("message content must not be empty")]
    EmptyContent,

    #[error("message content exceeds {max} characters")]
    ContentTooLong { max: usize },

    #[error("channel '{0}' does not exist")]
    ChannelNotFound(String),

    #[error("replies are only allowed in announcement channels")]
    ReplyNotAllowed,

    #[error("reply target '{0}' is not a message in this channel")]
    ReplyTargetNotFound(String),

    #[error("cannot reply to '{0}': it is already a reply")]
    NestedReply(String),

    #[error("message write failed")]
    Store(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("channel '{0}' does not exist")]
    ChannelNotFound(String),

    #[error("channel lookup failed")]
    Store(#[source] anyhow::Error),
}
