pub mod api;
pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod message;
pub mod rate_limit;
pub mod room;
pub mod server;
pub mod subscription;
pub mod tasks;
pub mod ws;

pub type ConnectionId = String;
pub type UserId = String;
pub type RoomId = String;

pub use config::Config;
pub use dispatch::MessageDispatcher;
pub use error::RealtimeError;
pub use hub::RealtimeHub;
