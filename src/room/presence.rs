use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::UserId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PresenceUpdate {
    Status(PresenceStatus),
    Cursor(Cursor),
}

/// A member's live state inside one room.
#[derive(Debug, Clone)]
pub struct Presence {
    pub user_id: UserId,
    pub username: Option<String>,
    pub status: PresenceStatus,
    pub cursor: Option<Cursor>,
    pub last_seen: DateTime<Utc>,
}

impl Presence {
    pub fn new(user_id: UserId, username: Option<String>) -> Self {
        Self {
            user_id,
            username,
            status: PresenceStatus::Online,
            cursor: None,
            last_seen: Utc::now(),
        }
    }

    /// Applies an update and refreshes `last_seen`.
    /// Returns whether the visible state actually changed.
    pub fn apply_update(&mut self, update: PresenceUpdate) -> bool {
        let changed = match update {
            PresenceUpdate::Status(status) => {
                if self.status != status {
                    self.status = status;
                    true
                } else {
                    false
                }
            }
            PresenceUpdate::Cursor(cursor) => {
                if self.cursor.as_ref() != Some(&cursor) {
                    self.cursor = Some(cursor);
                    true
                } else {
                    false
                }
            }
        };
        self.last_seen = Utc::now();
        changed
    }

    pub fn view(&self) -> PresenceView {
        PresenceView {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            status: self.status,
            cursor: self.cursor.clone(),
            last_seen: self.last_seen,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PresenceView {
    pub user_id: UserId,
    pub username: Option<String>,
    pub status: PresenceStatus,
    pub cursor: Option<Cursor>,
    pub last_seen: DateTime<Utc>,
}
