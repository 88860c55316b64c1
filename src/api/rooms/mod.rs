use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{RealtimeHub, RoomId, room::error::RoomError};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default, alias = "capacity")]
    pub max_members: Option<usize>,
}

/// GET /api/rooms
/// List all rooms
pub async fn list_rooms(State(hub): State<Arc<RealtimeHub>>) -> impl IntoResponse {
    Json(hub.list_rooms().await)
}

/// GET /api/rooms/{room_id}
/// Get room details
pub async fn get_room(State(hub): State<Arc<RealtimeHub>>, Path(room_id): Path<RoomId>) -> impl IntoResponse {
    match hub.room_details(&room_id).await {
        Some(details) => Json(details).into_response(),
        None => RoomError::RoomNotFound(room_id).into_response(),
    }
}

/// POST /api/rooms/{room_id}
/// Create a persistent room, or make an existing one persistent
pub async fn create_room(
    State(hub): State<Arc<RealtimeHub>>,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<CreateRoomRequest>,
) -> impl IntoResponse {
    let status = if hub.ensure_room(&room_id, payload.max_members).await {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(serde_json::json!({ "success": true, "room_id": room_id })))
}

/// DELETE /api/rooms/{room_id}
/// Delete a room, detaching every member
pub async fn delete_room(State(hub): State<Arc<RealtimeHub>>, Path(room_id): Path<RoomId>) -> impl IntoResponse {
    if hub.delete_room(&room_id).await {
        (StatusCode::OK, Json(serde_json::json!({ "success": true }))).into_response()
    } else {
        RoomError::RoomNotFound(room_id).into_response()
    }
}
