use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, Method},
    routing::get,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::{Config, MessageDispatcher, RealtimeHub, api, ws::ws_handler};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    pub dispatcher: Arc<MessageDispatcher>,
}

impl FromRef<AppState> for Arc<RealtimeHub> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.hub)
    }
}

impl FromRef<AppState> for Arc<MessageDispatcher> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.dispatcher)
    }
}

pub struct App {
    state: AppState,
}

impl App {
    pub fn new(config: Config) -> Self {
        let hub = RealtimeHub::new(config);
        let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&hub)));
        Self {
            state: AppState { hub, dispatcher },
        }
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.state.hub
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.state.dispatcher
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            // allow `GET`, `POST`, and `DELETE` when accessing the resource
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            // allow the Content-Type header and the headers needed for WebSockets
            .allow_headers([
                HeaderName::from_static("content-type"),
                HeaderName::from_static("authorization"),
                HeaderName::from_static("upgrade"),
                HeaderName::from_static("connection"),
                HeaderName::from_static("sec-websocket-key"),
                HeaderName::from_static("sec-websocket-version"),
                HeaderName::from_static("sec-websocket-extensions"),
                HeaderName::from_static("sec-websocket-protocol"),
            ])
            .allow_origin(Any);

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/realtime/stats", get(api::stats::get_stats))
            .route("/api/rooms", get(api::rooms::list_rooms))
            .route(
                "/api/rooms/{room_id}",
                get(api::rooms::get_room)
                    .post(api::rooms::create_room)
                    .delete(api::rooms::delete_room),
            )
            .route("/api/rooms/{room_id}/presence", get(api::presence::get_presence))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serves on `listener` until `shutdown` resolves, then closes every connection.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let hub = Arc::clone(&self.state.hub);
        hub.start().await;

        let router = self.router();
        info!("Server running on http://{}", listener.local_addr()?);
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        hub.shutdown().await;
        match &result {
            Ok(()) => info!("Server shut down gracefully"),
            Err(e) => error!("Server error: {}", e),
        }
        result
    }

    /// Binds the configured address and serves until Ctrl-C.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(self.state.hub.config().bind_address()).await?;
        self.serve(listener, shutdown_signal()).await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
