use std::sync::Arc;

use super::{MessageDispatcher, ai, ai::AiRequestState, upload::UploadState};
use crate::{
    ConnectionId, UserId,
    error::RealtimeError,
    hub::DisconnectReason,
    message::{ClientMessage, Inbound, ServerMessage},
    room::{
        error::RoomError,
        presence::{Cursor, PresenceUpdate},
    },
    subscription::NotificationFilter,
};

impl MessageDispatcher {
    pub(super) async fn handle(
        &self,
        connection_id: &ConnectionId,
        user_id: &UserId,
        inbound: Inbound,
    ) -> Result<(), RealtimeError> {
        match &inbound.message {
            ClientMessage::JoinRoom {} => {
                let room_id = inbound.require_room()?;
                self.hub.join_room(connection_id, room_id).await?;
            }
            ClientMessage::LeaveRoom {} => {
                let room_id = inbound.require_room()?;
                if !self.hub.leave_room(connection_id, room_id).await {
                    return Err(RoomError::NotInRoom {
                        connection_id: connection_id.clone(),
                        room_id: room_id.clone(),
                    }
                    .into());
                }
            }
            ClientMessage::CursorMove { x, y, cell } => {
                let room_id = inbound.require_room()?;
                let cursor = Cursor {
                    x: *x,
                    y: *y,
                    cell: cell.clone(),
                };
                self.hub
                    .update_presence(connection_id, room_id, PresenceUpdate::Cursor(cursor))
                    .await?;
            }
            ClientMessage::StatusUpdate { status } => {
                // Without a room the status applies to every joined room.
                let rooms = match &inbound.room {
                    Some(room_id) => vec![room_id.clone()],
                    None => self.hub.rooms_of(connection_id).await,
                };
                for room_id in &rooms {
                    self.hub
                        .update_presence(connection_id, room_id, PresenceUpdate::Status(*status))
                        .await?;
                }
            }
            ClientMessage::CellUpdate { cell, value, sheet_id } => {
                let room_id = inbound.require_room()?;
                self.hub.require_membership(connection_id, room_id).await?;
                if let Some(sheet_id) = sheet_id {
                    self.hub.mark_active_resource(room_id, sheet_id).await;
                }
                let sent = self
                    .hub
                    .broadcast(
                        room_id,
                        ServerMessage::CellUpdated {
                            room_id: room_id.clone(),
                            user_id: user_id.clone(),
                            cell: cell.clone(),
                            value: value.clone(),
                            sheet_id: sheet_id.clone(),
                        },
                        Some(connection_id),
                    )
                    .await;
                tracing::debug!(%connection_id, %room_id, %cell, sent, "Cell update relayed");
            }
            ClientMessage::TypingStart { cell } | ClientMessage::TypingStop { cell } => {
                let room_id = inbound.require_room()?;
                self.hub.require_membership(connection_id, room_id).await?;
                let (room_id, user_id, cell) = (room_id.clone(), user_id.clone(), cell.clone());
                let message = if matches!(inbound.message, ClientMessage::TypingStart { .. }) {
                    ServerMessage::TypingStarted {
                        room_id: room_id.clone(),
                        user_id,
                        cell,
                    }
                } else {
                    ServerMessage::TypingStopped {
                        room_id: room_id.clone(),
                        user_id,
                        cell,
                    }
                };
                self.hub.broadcast(&room_id, message, Some(connection_id)).await;
            }
            ClientMessage::AiRequest { prompt, context } => {
                let request_id = self
                    .ai
                    .lock()
                    .await
                    .start(connection_id, user_id, inbound.room.clone(), prompt);
                tracing::info!(%connection_id, %user_id, %request_id, "AI request accepted");
                self.hub
                    .send(
                        connection_id,
                        ServerMessage::AiProcessing {
                            request_id: request_id.clone(),
                            progress: 0,
                        },
                    )
                    .await;

                let spawned = self
                    .hub
                    .tasks()
                    .spawn(
                        "ai_request",
                        ai::run_request(
                            Arc::clone(&self.hub),
                            Arc::clone(&self.ai),
                            request_id.clone(),
                            connection_id.clone(),
                            prompt.clone(),
                            context.clone(),
                        ),
                    )
                    .await;
                if !spawned {
                    self.ai.lock().await.finish(&request_id, AiRequestState::Error);
                    self.hub
                        .send(
                            connection_id,
                            ServerMessage::AiError {
                                request_id,
                                error: "Server is shutting down".to_string(),
                            },
                        )
                        .await;
                }
            }
            ClientMessage::SubscribeNotifications {
                categories,
                modules,
                priorities,
            } => {
                let filter = NotificationFilter::new(categories.clone(), modules.clone(), priorities.clone());
                self.hub.set_subscription(connection_id, Some(filter)).await;
                tracing::debug!(%connection_id, ?categories, ?modules, ?priorities, "Subscribed to notifications");
                self.hub
                    .send(
                        connection_id,
                        ServerMessage::Subscribed {
                            categories: categories.clone(),
                            modules: modules.clone(),
                            priorities: priorities.clone(),
                        },
                    )
                    .await;
            }
            ClientMessage::UnsubscribeNotifications {} => {
                self.hub.set_subscription(connection_id, None).await;
                self.hub.send(connection_id, ServerMessage::Unsubscribed {}).await;
            }
            ClientMessage::NotificationRead { notification_id } => {
                self.hub
                    .send_to_user(
                        user_id,
                        ServerMessage::NotificationMarkedRead {
                            notification_id: notification_id.clone(),
                        },
                    )
                    .await;
            }
            ClientMessage::FileUploadStart {
                file_id,
                file_name,
                file_size,
            } => {
                if let Some(room_id) = &inbound.room {
                    self.hub.require_membership(connection_id, room_id).await?;
                }
                self.uploads.lock().await.start(
                    file_id,
                    file_name,
                    *file_size,
                    connection_id,
                    user_id,
                    inbound.room.clone(),
                )?;
                tracing::info!(%connection_id, %file_id, file_size, "Upload started");
                self.hub
                    .send(
                        connection_id,
                        ServerMessage::FileUploadStarted {
                            file_id: file_id.clone(),
                            file_name: file_name.clone(),
                            file_size: *file_size,
                        },
                    )
                    .await;
            }
            ClientMessage::FileUploadProgress {
                file_id,
                bytes_uploaded,
            } => {
                let upload = self
                    .uploads
                    .lock()
                    .await
                    .progress(file_id, connection_id, *bytes_uploaded)?;
                self.hub
                    .send(
                        connection_id,
                        ServerMessage::FileUploadProgress {
                            file_id: file_id.clone(),
                            bytes_uploaded: upload.bytes_uploaded,
                            progress: upload.progress(),
                        },
                    )
                    .await;

                if upload.state == UploadState::Completed {
                    tracing::info!(%connection_id, %file_id, room = ?upload.room, "Upload completed");
                    let complete = ServerMessage::FileUploadComplete {
                        file_id: upload.file_id.clone(),
                        file_name: upload.file_name.clone(),
                        user_id: upload.user_id.clone(),
                    };
                    if let Some(room_id) = &upload.room {
                        self.hub
                            .broadcast(room_id, complete.clone(), Some(connection_id))
                            .await;
                    }
                    self.hub.send(connection_id, complete).await;
                }
            }
            ClientMessage::Ping {} => match self.hub.record_heartbeat(connection_id).await {
                Ok(()) => {
                    self.hub.send(connection_id, ServerMessage::Pong {}).await;
                }
                Err(e) => {
                    self.reply_error(connection_id, &e.into()).await;
                    self.hub
                        .disconnect(connection_id, DisconnectReason::SessionExpired)
                        .await;
                }
            },
        }
        Ok(())
    }
}
