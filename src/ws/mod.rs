use axum::{
    body::Bytes,
    extract::{
        ConnectInfo, Query, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use std::{
    fmt::Display,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;

use crate::{
    auth::extract_token,
    connection::Outbound,
    dispatch::MessageDispatcher,
    error::TransportError,
    hub::{ConnectionHandle, DisconnectReason},
    message::{Envelope, ServerMessage},
};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws`: upgrades and hands the socket to [`handle_socket`].
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Arc<MessageDispatcher>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let token = extract_token(params.token.as_deref(), &headers);
    tracing::debug!(%peer, has_token = token.is_some(), "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, token, Some(peer.ip())))
}

/// Runs one client socket until either side goes away.
///
/// A writer task drains the connection's outbound queue into the socket in
/// order; a reader task feeds text frames to the dispatcher. When either ends
/// the other is aborted and the connection is removed from the hub.
pub async fn handle_socket(
    socket: WebSocket,
    dispatcher: Arc<MessageDispatcher>,
    token: Option<String>,
    peer: Option<IpAddr>,
) {
    let hub = Arc::clone(dispatcher.hub());
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let ConnectionHandle {
        connection_id,
        user_id,
        mut outbound,
    } = match hub.connect(token.as_deref(), peer).await {
        Ok(handle) => handle,
        Err(e) => {
            let code = e.close_code();
            let error = Envelope::new(ServerMessage::error(e.code(), e.to_string()));
            if let Ok(text) = Utf8Bytes::try_from(&error) {
                let _ = ws_sender.send(Message::Text(text)).await;
            }
            let reason = match code {
                close_code::POLICY => "authentication failed",
                close_code::AGAIN => "too many connection attempts",
                _ => "connection refused",
            };
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };
    tracing::info!(%connection_id, %user_id, ?peer, "WebSocket connection established");

    // --- Writer: outbound queue -> socket ---
    let writer_id = connection_id.clone();
    let write_limit = hub.config().stale_timeout();
    let mut send_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let frame = match item {
                Outbound::Message(envelope) => match Utf8Bytes::try_from(&envelope) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        tracing::error!(connection_id = %writer_id, error = %e, "Failed to serialize server message");
                        continue;
                    }
                },
                Outbound::Ping => Message::Ping(Bytes::new()),
                Outbound::Close { code, reason } => {
                    let close = Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    }));
                    let _ = write_frame(&mut ws_sender, &writer_id, close, write_limit).await;
                    break;
                }
            };
            if let Err(e) = write_frame(&mut ws_sender, &writer_id, frame, write_limit).await {
                tracing::debug!(error = %e, "Socket write failed");
                break;
            }
        }
        let _ = tokio::time::timeout(write_limit, ws_sender.close()).await;
    });

    // --- Reader: socket -> dispatcher ---
    let reader_id = connection_id.clone();
    let reader = Arc::clone(&dispatcher);
    let mut recv_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => reader.dispatch(&reader_id, text.as_str()).await,
                Ok(Message::Binary(bytes)) => reader.reject_binary(&reader_id, bytes.len()).await,
                Ok(Message::Pong(_)) => {
                    // An expired session is closed through the writer, which then ends the loop.
                    reader.hub().acknowledge_heartbeat(&reader_id).await;
                }
                Ok(Message::Ping(_)) => {
                    tracing::trace!(connection_id = %reader_id, "Ping from client");
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(connection_id = %reader_id, ?frame, "Client sent close");
                    break;
                }
                Err(e) => {
                    tracing::debug!(connection_id = %reader_id, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(&connection_id, DisconnectReason::ClientClosed)
        .await;
    tracing::info!(%connection_id, %user_id, "WebSocket connection closed");
}

/// Writes one frame, giving up if the peer has not accepted it within `limit`.
async fn write_frame<S>(
    sender: &mut S,
    connection_id: &str,
    frame: Message,
    limit: Duration,
) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sender.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::WriteFailed {
            connection_id: connection_id.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(TransportError::WriteTimeout {
            connection_id: connection_id.to_string(),
            after: limit,
        }),
    }
}
