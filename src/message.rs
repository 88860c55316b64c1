//! Wire protocol.
//!
//! Every frame is a JSON envelope
//! `{"type", "data"?, "room"?, "target_user"?, "timestamp", "message_id"}`.
//! Inbound frames decode into the closed [`ClientMessage`] union; outbound
//! frames wrap a [`ServerMessage`] in an [`Envelope`]. Clients may send
//! `target_user`, but direct addressing goes through
//! `RealtimeHub::send_to_user`, so the field is accepted and ignored.

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    ConnectionId, RoomId, UserId,
    error::ValidationError,
    room::presence::{PresenceStatus, PresenceView},
    subscription::Notification,
};

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export)]
pub enum ClientMessage {
    JoinRoom {},
    LeaveRoom {},
    CursorMove {
        x: f64,
        y: f64,
        #[serde(default)]
        cell: Option<String>,
    },
    CellUpdate {
        cell: String,
        value: Value,
        #[serde(default)]
        sheet_id: Option<String>,
    },
    StatusUpdate {
        status: PresenceStatus,
    },
    TypingStart {
        #[serde(default)]
        cell: Option<String>,
    },
    TypingStop {
        #[serde(default)]
        cell: Option<String>,
    },
    AiRequest {
        prompt: String,
        #[serde(default)]
        context: Option<Value>,
    },
    SubscribeNotifications {
        #[serde(default)]
        categories: BTreeSet<String>,
        #[serde(default)]
        modules: BTreeSet<String>,
        #[serde(default)]
        priorities: BTreeSet<String>,
    },
    UnsubscribeNotifications {},
    NotificationRead {
        notification_id: String,
    },
    FileUploadStart {
        file_id: String,
        file_name: String,
        file_size: u64,
    },
    FileUploadProgress {
        file_id: String,
        bytes_uploaded: u64,
    },
    Ping {},
}

impl ClientMessage {
    pub const KINDS: [&'static str; 14] = [
        "join_room",
        "leave_room",
        "cursor_move",
        "cell_update",
        "status_update",
        "typing_start",
        "typing_stop",
        "ai_request",
        "subscribe_notifications",
        "unsubscribe_notifications",
        "notification_read",
        "file_upload_start",
        "file_upload_progress",
        "ping",
    ];

    /// The `type` tag of this message, used as the action name for permission checks.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom {} => "join_room",
            ClientMessage::LeaveRoom {} => "leave_room",
            ClientMessage::CursorMove { .. } => "cursor_move",
            ClientMessage::CellUpdate { .. } => "cell_update",
            ClientMessage::StatusUpdate { .. } => "status_update",
            ClientMessage::TypingStart { .. } => "typing_start",
            ClientMessage::TypingStop { .. } => "typing_stop",
            ClientMessage::AiRequest { .. } => "ai_request",
            ClientMessage::SubscribeNotifications { .. } => "subscribe_notifications",
            ClientMessage::UnsubscribeNotifications {} => "unsubscribe_notifications",
            ClientMessage::NotificationRead { .. } => "notification_read",
            ClientMessage::FileUploadStart { .. } => "file_upload_start",
            ClientMessage::FileUploadProgress { .. } => "file_upload_progress",
            ClientMessage::Ping {} => "ping",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    room: Option<RoomId>,
    #[serde(default)]
    message_id: Option<String>,
}

/// A decoded client frame.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub message: ClientMessage,
    pub room: Option<RoomId>,
    pub message_id: Option<String>,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(ValidationError::Malformed)?;

        if !ClientMessage::KINDS.contains(&raw.kind.as_str()) {
            return Err(ValidationError::UnknownType(raw.kind));
        }

        // Payload-less frames are accepted for every type; variants with
        // required fields then fail with a schema error naming the field.
        let data = match raw.data {
            Value::Null => Value::Object(Default::default()),
            data => data,
        };
        let message = serde_json::from_value::<ClientMessage>(serde_json::json!({
            "type": &raw.kind,
            "data": data,
        }))
        .map_err(|source| ValidationError::Schema {
            kind: raw.kind.clone(),
            source,
        })?;

        Ok(Self {
            message,
            room: raw.room.filter(|room| !room.is_empty()),
            message_id: raw.message_id,
        })
    }

    pub fn require_room(&self) -> Result<&RoomId, ValidationError> {
        self.room
            .as_ref()
            .ok_or(ValidationError::MissingRoom(self.message.kind()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ErrorCode {
    AuthenticationFailed,
    RateLimited,
    InvalidMessage,
    UnknownMessageType,
    PermissionDenied,
    RoomFull,
    RoomNotFound,
    NotInRoom,
    Internal,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[ts(export)]
pub enum ServerMessage {
    Connected {
        connection_id: ConnectionId,
        user_id: UserId,
        /// Seconds between server heartbeats.
        heartbeat_interval: u64,
    },
    RoomState {
        room_id: RoomId,
        /// Other members currently in the room.
        users: Vec<PresenceView>,
        active_resources: Vec<String>,
        total_users: usize,
    },
    UserJoined {
        room_id: RoomId,
        user_id: UserId,
        username: Option<String>,
        total_users: usize,
    },
    UserLeft {
        room_id: RoomId,
        user_id: UserId,
        total_users: usize,
    },
    RoomLeft {
        room_id: RoomId,
    },
    CursorMoved {
        room_id: RoomId,
        user_id: UserId,
        x: f64,
        y: f64,
        cell: Option<String>,
    },
    CellUpdated {
        room_id: RoomId,
        user_id: UserId,
        cell: String,
        value: Value,
        sheet_id: Option<String>,
    },
    StatusChanged {
        room_id: RoomId,
        user_id: UserId,
        status: PresenceStatus,
    },
    TypingStarted {
        room_id: RoomId,
        user_id: UserId,
        cell: Option<String>,
    },
    TypingStopped {
        room_id: RoomId,
        user_id: UserId,
        cell: Option<String>,
    },
    AiProcessing {
        request_id: String,
        progress: u8,
    },
    AiResponse {
        request_id: String,
        response: String,
    },
    AiError {
        request_id: String,
        error: String,
    },
    Subscribed {
        categories: BTreeSet<String>,
        modules: BTreeSet<String>,
        priorities: BTreeSet<String>,
    },
    Unsubscribed {},
    Notification {
        event_type: String,
        notification: Notification,
    },
    NotificationMarkedRead {
        notification_id: String,
    },
    FileUploadStarted {
        file_id: String,
        file_name: String,
        file_size: u64,
    },
    FileUploadProgress {
        file_id: String,
        bytes_uploaded: u64,
        progress: f64,
    },
    FileUploadComplete {
        file_id: String,
        file_name: String,
        user_id: UserId,
    },
    Heartbeat {},
    Pong {},
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Outbound frame: a server message plus the envelope metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    pub timestamp: DateTime<Utc>,
    pub message_id: Uuid,
}

impl Envelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message,
            room: None,
            timestamp: Utc::now(),
            message_id: Uuid::new_v4(),
        }
    }

    pub fn in_room(message: ServerMessage, room_id: &RoomId) -> Self {
        Self {
            room: Some(room_id.clone()),
            ..Self::new(message)
        }
    }
}

impl From<ServerMessage> for Envelope {
    fn from(message: ServerMessage) -> Self {
        Envelope::new(message)
    }
}

impl TryFrom<&Envelope> for Utf8Bytes {
    type Error = serde_json::Error;
    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        serde_json::to_string(envelope).map(Utf8Bytes::from)
    }
}
