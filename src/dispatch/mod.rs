//! Routing of decoded client frames to their handlers.
//!
//! Every frame passes the same pipeline: decode, per-user rate limit,
//! permission check, handler. A failure at any stage is answered with an
//! `error` message to the sender only; the socket stays open.

pub mod ai;
mod handlers;
pub mod upload;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    ConnectionId,
    error::{RealtimeError, ValidationError},
    hub::RealtimeHub,
    message::{Inbound, ServerMessage},
    room::error::RoomError,
};
use ai::AiTracker;
use upload::UploadTracker;

pub struct MessageDispatcher {
    hub: Arc<RealtimeHub>,
    ai: Arc<Mutex<AiTracker>>,
    uploads: Mutex<UploadTracker>,
}

impl MessageDispatcher {
    pub fn new(hub: Arc<RealtimeHub>) -> Self {
        Self {
            hub,
            ai: Arc::new(Mutex::new(AiTracker::default())),
            uploads: Mutex::new(UploadTracker::default()),
        }
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    pub async fn pending_ai_requests(&self) -> usize {
        self.ai.lock().await.len()
    }

    pub async fn pending_uploads(&self) -> usize {
        self.uploads.lock().await.len()
    }

    /// Handles one text frame from `connection_id`.
    pub async fn dispatch(&self, connection_id: &ConnectionId, text: &str) {
        if let Err(error) = self.try_dispatch(connection_id, text).await {
            self.reply_error(connection_id, &error).await;
        }
    }

    pub async fn reject_binary(&self, connection_id: &ConnectionId, len: usize) {
        tracing::debug!(%connection_id, len, "Binary frame rejected");
        self.reply_error(connection_id, &ValidationError::Binary.into())
            .await;
    }

    async fn try_dispatch(&self, connection_id: &ConnectionId, text: &str) -> Result<(), RealtimeError> {
        let inbound = Inbound::parse(text)?;
        let user_id = self
            .hub
            .user_of(connection_id)
            .await
            .ok_or_else(|| RoomError::Unauthenticated(connection_id.clone()))?;
        let action = inbound.message.kind();

        self.hub.check_message_rate(&user_id).await?;
        self.hub.check_permission(connection_id, action).await?;

        tracing::debug!(%connection_id, %user_id, action, room = ?inbound.room, "Dispatching message");
        self.handle(connection_id, &user_id, inbound).await
    }

    async fn reply_error(&self, connection_id: &ConnectionId, error: &RealtimeError) {
        match error {
            RealtimeError::Validation(_) | RealtimeError::Room(_) => {
                tracing::debug!(%connection_id, error = %error, "Message rejected")
            }
            _ => tracing::warn!(%connection_id, error = %error, "Message rejected"),
        }
        self.hub
            .send(connection_id, ServerMessage::error(error.code(), error.to_string()))
            .await;
    }
}
