use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::room::error::RoomError;

pub mod presence;
pub mod rooms;
pub mod stats;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    error: String,
    message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            RoomError::RoomNotFound(_) => (StatusCode::NOT_FOUND, "RoomNotFound"),
            RoomError::RoomFull { .. } => (StatusCode::CONFLICT, "RoomFull"),
            RoomError::NotInRoom { .. } => (StatusCode::CONFLICT, "NotInRoom"),
            RoomError::ConnectionNotFound(_) => (StatusCode::NOT_FOUND, "ConnectionNotFound"),
            RoomError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "Unauthenticated"),
        };
        (status, Json(ErrorResponse::new(error, &self.to_string()))).into_response()
    }
}
