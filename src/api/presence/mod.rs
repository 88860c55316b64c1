use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;
use std::sync::Arc;

use crate::{RealtimeHub, RoomId, room::error::RoomError, room::presence::PresenceView};

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub room_id: RoomId,
    pub users: Vec<PresenceView>,
}

/// GET /api/rooms/{room_id}/presence
/// Presence of every user in a room
pub async fn get_presence(State(hub): State<Arc<RealtimeHub>>, Path(room_id): Path<RoomId>) -> impl IntoResponse {
    match hub.room_details(&room_id).await {
        Some(details) => Json(PresenceResponse {
            room_id,
            users: details.users,
        })
        .into_response(),
        None => RoomError::RoomNotFound(room_id).into_response(),
    }
}
