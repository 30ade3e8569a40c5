//! Error taxonomy shared by the gateway, the matchmaking engine and the stores.

use thiserror::Error;

/// Failures raised by the SQLite-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    Lock,

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("instance revision changed since it was read")]
    RevisionConflict,

    #[error("could not allocate a unique join code")]
    JoinCodeExhausted,

    #[error("stored row is invalid: {0}")]
    InvalidRow(String),
}

/// Matchmaking failures. Every variant except `Store` is reported to the
/// client on the still-open connection.
#[derive(Debug, Error)]
pub enum MatchmakingError {
    #[error("The room you requested does not exist.")]
    RoomNotFound,

    #[error("The instance you requested does not exist.")]
    InstanceNotFound,

    #[error("You do not have permission to join this room.")]
    PermissionDenied,

    #[error("The instance you requested is full.")]
    InstanceFull,

    #[error("The instance you requested cannot be joined.")]
    InstanceNotJoinable,

    #[error("You cannot leave an instance, you are not in one.")]
    NotInInstance,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MatchmakingError {
    /// Message sent back over the socket. Store faults are not leaked.
    pub fn client_message(&self) -> String {
        match self {
            MatchmakingError::Store(_) => {
                "An internal error occurred while processing your request.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingToken,
    InvalidToken,
    Banned,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "no_token",
            AuthFailure::InvalidToken => "invalid_token",
            AuthFailure::Banned => "banned",
        }
    }
}

/// Failures on the gateway connection itself.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {}", .0.as_str())]
    Authentication(AuthFailure),

    #[error("user already has an active connection")]
    DuplicateConnection,

    #[error("could not decode frame: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
