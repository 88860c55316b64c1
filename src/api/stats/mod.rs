use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::RealtimeHub;

/// GET /api/realtime/stats
pub async fn get_stats(State(hub): State<Arc<RealtimeHub>>) -> impl IntoResponse {
    Json(hub.stats().await)
}
