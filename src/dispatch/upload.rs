use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::{ConnectionId, RoomId, UserId, error::ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Uploading,
    Completed,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub bytes_uploaded: u64,
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub room: Option<RoomId>,
    pub state: UploadState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    /// Percentage in `0.0..=100.0`. An empty file counts as done.
    pub fn progress(&self) -> f64 {
        if self.file_size == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.file_size as f64 * 100.0).min(100.0)
    }
}

/// In-flight uploads keyed by file id.
///
/// Uploads only leave the tracker by completing; there is no abandonment
/// timeout.
#[derive(Debug, Default)]
pub struct UploadTracker {
    uploads: HashMap<String, Upload>,
}

impl UploadTracker {
    pub fn start(
        &mut self,
        file_id: &str,
        file_name: &str,
        file_size: u64,
        connection_id: &ConnectionId,
        user_id: &UserId,
        room: Option<RoomId>,
    ) -> Result<&Upload, ValidationError> {
        if self.uploads.contains_key(file_id) {
            return Err(ValidationError::DuplicateUpload(file_id.to_string()));
        }
        let now = Utc::now();
        let upload = Upload {
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            file_size,
            bytes_uploaded: 0,
            connection_id: connection_id.clone(),
            user_id: user_id.clone(),
            room,
            state: UploadState::Uploading,
            started_at: now,
            updated_at: now,
        };
        Ok(self.uploads.entry(file_id.to_string()).or_insert(upload))
    }

    /// Records progress reported by the uploading connection. A completed
    /// upload is removed and returned with [`UploadState::Completed`].
    pub fn progress(
        &mut self,
        file_id: &str,
        connection_id: &ConnectionId,
        bytes_uploaded: u64,
    ) -> Result<Upload, ValidationError> {
        let upload = self
            .uploads
            .get_mut(file_id)
            .filter(|upload| upload.connection_id == *connection_id)
            .ok_or_else(|| ValidationError::UnknownUpload(file_id.to_string()))?;

        upload.bytes_uploaded = bytes_uploaded.min(upload.file_size);
        upload.updated_at = Utc::now();
        if bytes_uploaded < upload.file_size {
            return Ok(upload.clone());
        }

        let mut done = self
            .uploads
            .remove(file_id)
            .ok_or_else(|| ValidationError::UnknownUpload(file_id.to_string()))?;
        done.state = UploadState::Completed;
        Ok(done)
    }

    pub fn get(&self, file_id: &str) -> Option<&Upload> {
        self.uploads.get(file_id)
    }

    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }
}
