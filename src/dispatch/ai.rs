use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{ConnectionId, RoomId, UserId, hub::RealtimeHub, message::ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AiRequestState {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct AiRequest {
    pub request_id: String,
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub room: Option<RoomId>,
    pub prompt: String,
    pub state: AiRequestState,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outstanding AI requests. Finished requests are removed.
#[derive(Debug, Default)]
pub struct AiTracker {
    requests: HashMap<String, AiRequest>,
}

impl AiTracker {
    pub fn start(
        &mut self,
        connection_id: &ConnectionId,
        user_id: &UserId,
        room: Option<RoomId>,
        prompt: &str,
    ) -> String {
        let request_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.requests.insert(
            request_id.clone(),
            AiRequest {
                request_id: request_id.clone(),
                connection_id: connection_id.clone(),
                user_id: user_id.clone(),
                room,
                prompt: prompt.to_string(),
                state: AiRequestState::Processing,
                progress: 0,
                started_at: now,
                updated_at: now,
            },
        );
        request_id
    }

    pub fn set_progress(&mut self, request_id: &str, progress: u8) -> bool {
        match self.requests.get_mut(request_id) {
            Some(request) => {
                request.progress = progress.min(100);
                request.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Moves a request to a terminal state and drops it from the tracker.
    pub fn finish(&mut self, request_id: &str, state: AiRequestState) -> Option<AiRequest> {
        let mut request = self.requests.remove(request_id)?;
        request.state = state;
        request.updated_at = Utc::now();
        if state == AiRequestState::Completed {
            request.progress = 100;
        }
        Some(request)
    }

    pub fn get(&self, request_id: &str) -> Option<&AiRequest> {
        self.requests.get(request_id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

fn respond(prompt: &str, context: Option<&Value>) -> String {
    match context {
        Some(context) if !context.is_null() => {
            format!("Processed request: {prompt} (context: {context})")
        }
        _ => format!("Processed request: {prompt}"),
    }
}

/// Drives one request to completion, reporting progress to the requester.
/// Abandons the request if the requester disconnects.
pub(super) async fn run_request(
    hub: Arc<RealtimeHub>,
    tracker: Arc<Mutex<AiTracker>>,
    request_id: String,
    connection_id: ConnectionId,
    prompt: String,
    context: Option<Value>,
) {
    let steps = hub.config().ai_progress_steps.max(1);
    let step_interval = hub.config().ai_step_interval();

    if prompt.trim().is_empty() {
        tracker.lock().await.finish(&request_id, AiRequestState::Error);
        tracing::info!(%connection_id, %request_id, "AI request rejected, empty prompt");
        hub.send(
            &connection_id,
            ServerMessage::AiError {
                request_id,
                error: "Prompt must not be empty".to_string(),
            },
        )
        .await;
        return;
    }

    for step in 1..steps {
        tokio::time::sleep(step_interval).await;
        let progress = (step * 100 / steps) as u8;
        tracker.lock().await.set_progress(&request_id, progress);
        let delivered = hub
            .send(
                &connection_id,
                ServerMessage::AiProcessing {
                    request_id: request_id.clone(),
                    progress,
                },
            )
            .await;
        if !delivered && !hub.is_connected(&connection_id).await {
            tracker.lock().await.finish(&request_id, AiRequestState::Error);
            tracing::debug!(%connection_id, %request_id, "Requester gone, AI request abandoned");
            return;
        }
    }
    tokio::time::sleep(step_interval).await;

    let finished = tracker.lock().await.finish(&request_id, AiRequestState::Completed);
    tracing::info!(
        %connection_id,
        %request_id,
        elapsed_ms = finished.map(|r| (r.updated_at - r.started_at).num_milliseconds()).unwrap_or_default(),
        "AI request completed"
    );
    hub.send(
        &connection_id,
        ServerMessage::AiResponse {
            request_id,
            response: respond(&prompt, context.as_ref()),
        },
    )
    .await;
}
