#[derive(thiserror::Error, Debug)]
pub enum RoomError {
    #[error("Target room '{0}' not found")]
    RoomNotFound(String),
    #[error("Room '{room_id}' is full ({max_members} members)")]
    RoomFull { room_id: String, max_members: usize },
    #[error("Connection '{connection_id}' is not in room '{room_id}'")]
    NotInRoom {
        connection_id: String,
        room_id: String,
    },
    #[error("Connection '{0}' has not been registered or is already disconnected")]
    ConnectionNotFound(String),
    #[error("Connection '{0}' is not authenticated")]
    Unauthenticated(String),
}
