use thiserror::Error;
use crate::gateway::GatewayError;

/// Errors surfaced to the UI layer by `SyncEngine` operations.
///
/// Send and delete failures always leave local state untouched, so callers can offer a
/// retry without reconciling anything first.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch {what}: {source}")] Fetch {
        what: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("failed to send message: {0}")] Send(#[source] GatewayError),

    #[error("failed to delete message: {0}")] Delete(#[source] GatewayError),

    #[error("message {message_id} was not sent by {viewer_id}")] DeleteUnauthorized {
        message_id: String,
        viewer_id: String,
    },

    #[error("message {0} not found")] MessageNotFound(String),

    #[error("failed to open conversation: {0}")] OpenConversation(#[source] GatewayError),

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("failed to encode message content: {0}")] Encode(#[from] serde_json::Error),
}

impl SyncError {
    pub fn fetch(what: &'static str, source: GatewayError) -> Self {
        SyncError::Fetch { what, source }
    }
}
