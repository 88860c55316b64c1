use std::time::Duration;

use axum::extract::ws::close_code;

use crate::{message::ErrorCode, room::error::RoomError};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Authentication token is missing")]
    MissingToken,
    #[error("Authentication token has expired")]
    Expired,
    #[error("Invalid authentication token: {0}")]
    Invalid(String),
    #[error("No authenticated session for connection '{0}'")]
    NoSession(String),
}

#[derive(thiserror::Error, Debug)]
#[error("Rate limit exceeded for '{identity}', retry in {}s", .retry_after.as_secs().max(1))]
pub struct RateLimitError {
    pub identity: String,
    pub retry_after: Duration,
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Unknown message type '{0}'")]
    UnknownType(String),
    #[error("Invalid payload for '{kind}': {source}")]
    Schema {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Message '{0}' requires a room")]
    MissingRoom(&'static str),
    #[error("Binary frames are not supported")]
    Binary,
    #[error("Upload '{0}' is already in progress")]
    DuplicateUpload(String),
    #[error("Unknown upload '{0}'")]
    UnknownUpload(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Connection '{0}' is not registered")]
    NotConnected(String),
    #[error("Connection '{0}' is closed")]
    Closed(String),
    #[error("Outbound queue for connection '{0}' is full")]
    Backlogged(String),
    #[error("Socket write for connection '{connection_id}' timed out after {after:?}")]
    WriteTimeout {
        connection_id: String,
        after: Duration,
    },
    #[error("Socket write for connection '{connection_id}' failed: {reason}")]
    WriteFailed { connection_id: String, reason: String },
}

#[derive(thiserror::Error, Debug)]
#[error("User '{user_id}' lacks permission '{permission}' required for '{action}'")]
pub struct PermissionError {
    pub user_id: String,
    pub action: &'static str,
    pub permission: &'static str,
}

#[derive(thiserror::Error, Debug)]
pub enum RealtimeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Room(#[from] RoomError),
}

impl RealtimeError {
    /// Wire-level code reported to the client in an `error` message.
    pub fn code(&self) -> ErrorCode {
        match self {
            RealtimeError::Auth(_) => ErrorCode::AuthenticationFailed,
            RealtimeError::RateLimited(_) => ErrorCode::RateLimited,
            RealtimeError::Validation(ValidationError::UnknownType(_)) => ErrorCode::UnknownMessageType,
            RealtimeError::Validation(_) => ErrorCode::InvalidMessage,
            RealtimeError::Transport(_) => ErrorCode::Internal,
            RealtimeError::Permission(_) => ErrorCode::PermissionDenied,
            RealtimeError::Room(RoomError::RoomFull { .. }) => ErrorCode::RoomFull,
            RealtimeError::Room(RoomError::RoomNotFound(_)) => ErrorCode::RoomNotFound,
            RealtimeError::Room(RoomError::NotInRoom { .. }) => ErrorCode::NotInRoom,
            RealtimeError::Room(_) => ErrorCode::Internal,
        }
    }

    /// Close code used when this error ends a connection attempt.
    pub fn close_code(&self) -> u16 {
        match self {
            RealtimeError::RateLimited(_) => close_code::AGAIN,
            RealtimeError::Auth(_) | RealtimeError::Permission(_) => close_code::POLICY,
            _ => close_code::ERROR,
        }
    }
}
