//! The shared real-time state and every operation that touches it.
//!
//! Connections and rooms live behind one lock so join and leave change both
//! sides together. No socket I/O happens under the lock: sends only enqueue
//! on per-connection channels, and connections found dead during a fan-out
//! are disconnected after the lock is released.

use axum::extract::ws::close_code;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashSet},
    net::IpAddr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{Mutex, RwLock, mpsc},
    time::{Instant, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    ConnectionId, RoomId, UserId,
    auth::Authenticator,
    config::Config,
    connection::{Connection, ConnectionRegistry, Delivery, Outbound},
    error::{AuthError, RateLimitError, RealtimeError, TransportError},
    message::{Envelope, ServerMessage},
    rate_limit::RateLimiter,
    room::{RoomDetails, RoomRegistry, error::RoomError, presence::PresenceUpdate},
    subscription::{Notification, NotificationFilter},
    tasks::TaskSupervisor,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct HubState {
    pub connections: ConnectionRegistry,
    pub rooms: RoomRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    Stale,
    TransportFailed,
    SessionExpired,
    Shutdown,
}

impl DisconnectReason {
    /// Silent disconnects leave rooms without a `user_left` broadcast.
    pub fn is_silent(self) -> bool {
        matches!(
            self,
            DisconnectReason::Stale | DisconnectReason::TransportFailed | DisconnectReason::Shutdown
        )
    }

    fn close_frame(self) -> Option<(u16, &'static str)> {
        match self {
            DisconnectReason::Stale => Some((close_code::AWAY, "heartbeat timeout")),
            DisconnectReason::SessionExpired => Some((close_code::POLICY, "session expired")),
            DisconnectReason::Shutdown => Some((close_code::AWAY, "server shutting down")),
            DisconnectReason::ClientClosed | DisconnectReason::TransportFailed => None,
        }
    }
}

/// Returned by [`RealtimeHub::connect`]; `outbound` feeds the socket writer.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub outbound: mpsc::Receiver<Outbound>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub total_rooms: usize,
    pub active_sessions: usize,
    pub room_sizes: BTreeMap<RoomId, usize>,
    pub rate_limited_identities: usize,
    pub blocked_identities: usize,
    pub heartbeat_running: bool,
    pub background_tasks: usize,
}

pub struct RealtimeHub {
    config: Config,
    state: RwLock<HubState>,
    auth: Authenticator,
    message_limiter: Mutex<RateLimiter>,
    connection_limiter: Mutex<RateLimiter>,
    heartbeat_running: Mutex<bool>,
    tasks: TaskSupervisor,
}

impl RealtimeHub {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HubState {
                connections: ConnectionRegistry::new(),
                rooms: RoomRegistry::new(config.room_max_members),
            }),
            auth: Authenticator::new(&config),
            message_limiter: Mutex::new(RateLimiter::new(config.message_limits)),
            connection_limiter: Mutex::new(RateLimiter::new(config.connection_limits)),
            heartbeat_running: Mutex::new(false),
            tasks: TaskSupervisor::new(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    pub fn tasks(&self) -> &TaskSupervisor {
        &self.tasks
    }

    /// Starts the periodic rate-limit sweep.
    pub async fn start(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        self.tasks
            .spawn("rate_limit_sweep", async move {
                let mut interval = tokio::time::interval(hub.config.rate_limit_sweep_interval());
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let now = Instant::now();
                    let messages = hub.message_limiter.lock().await.sweep(now);
                    let connections = hub.connection_limiter.lock().await.sweep(now);
                    tracing::debug!(messages, connections, "Swept idle rate-limit entries");
                }
            })
            .await;
    }

    // --- Connection lifecycle ---

    /// Authenticates a new socket and registers it.
    pub async fn connect(
        self: &Arc<Self>,
        token: Option<&str>,
        peer: Option<IpAddr>,
    ) -> Result<ConnectionHandle, RealtimeError> {
        // Attempts from a known peer count whether or not the token verifies.
        if let Some(ip) = peer {
            self.check_connection_rate(&format!("ip:{ip}"), peer).await?;
        }
        let identity = self.auth.verify(token).inspect_err(|e| {
            tracing::warn!(peer = ?peer, error = %e, "Rejected connection attempt");
        })?;
        if peer.is_none() {
            self.check_connection_rate(&format!("user:{}", identity.user_id), peer)
                .await?;
        }

        let connection_id = Uuid::new_v4().to_string();
        let user_id = identity.user_id.clone();
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let connection = Connection::new(connection_id.clone(), &identity, peer, tx);

        self.auth
            .open_session(&connection_id, identity, token.unwrap_or_default().to_string())
            .await;
        {
            let mut state = self.state.write().await;
            state.connections.insert(connection);
            let connected = ServerMessage::Connected {
                connection_id: connection_id.clone(),
                user_id: user_id.clone(),
                heartbeat_interval: self.config.heartbeat_interval().as_secs(),
            };
            if let Err(e) = state.connections.send(&connection_id, connected.into()) {
                tracing::warn!(%connection_id, error = %e, "Failed to queue connected message");
            }
            tracing::info!(%connection_id, %user_id, total = state.connections.len(), "Connection registered");
        }

        self.ensure_heartbeat().await;
        Ok(ConnectionHandle {
            connection_id,
            user_id,
            outbound: rx,
        })
    }

    async fn check_connection_rate(&self, key: &str, peer: Option<IpAddr>) -> Result<(), RateLimitError> {
        self.connection_limiter
            .lock()
            .await
            .check(key, Instant::now())
            .inspect_err(|e| tracing::warn!(peer = ?peer, error = %e, "Connection attempt rate limited"))
    }

    /// Tears a connection down. Idempotent: returns `false` if it was already gone.
    ///
    /// Connections whose transport turns out to be closed while notifying the
    /// rooms are torn down too, silently.
    pub async fn disconnect(&self, connection_id: &ConnectionId, reason: DisconnectReason) -> bool {
        let mut pending = vec![(connection_id.clone(), reason)];
        let mut removed = false;
        while let Some((id, reason)) = pending.pop() {
            let Some(delivery) = self.remove_connection(&id, reason).await else {
                continue;
            };
            removed |= id == *connection_id;
            pending.extend(
                delivery
                    .dead
                    .into_iter()
                    .map(|dead| (dead, DisconnectReason::TransportFailed)),
            );
        }
        removed
    }

    async fn remove_connection(&self, connection_id: &ConnectionId, reason: DisconnectReason) -> Option<Delivery> {
        let mut delivery = Delivery::default();
        {
            let mut state = self.state.write().await;
            let HubState { connections, rooms } = &mut *state;

            let joined: Vec<RoomId> = connections.get(connection_id)?.rooms.iter().cloned().collect();
            for room_id in &joined {
                if let Some(left) = rooms.leave(connections, connection_id, room_id, reason.is_silent()) {
                    delivery.merge(left);
                }
            }
            if let Some((code, text)) = reason.close_frame() {
                let _ = connections.push(
                    connection_id,
                    Outbound::Close {
                        code,
                        reason: text.to_string(),
                    },
                );
            }
            let connection = connections.remove(connection_id)?;
            tracing::info!(
                %connection_id,
                user_id = connection.user_id.as_deref().unwrap_or_default(),
                ?reason,
                rooms_left = joined.len(),
                remaining = connections.len(),
                "Connection removed"
            );
        }
        self.auth.close_session(connection_id).await;
        delivery.dead.retain(|dead| dead != connection_id);
        Some(delivery)
    }

    async fn reap(&self, delivery: Delivery) {
        for dead in delivery.dead {
            self.disconnect(&dead, DisconnectReason::TransportFailed).await;
        }
    }

    pub async fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.state.read().await.connections.contains(connection_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.state
            .read()
            .await
            .connections
            .get(connection_id)
            .and_then(|connection| connection.user_id.clone())
    }

    pub async fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let state = self.state.read().await;
        let mut rooms: Vec<RoomId> = state
            .connections
            .get(connection_id)
            .map(|connection| connection.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    // --- Sending ---

    /// Best-effort send to one connection. A closed transport disconnects it.
    pub async fn send(&self, connection_id: &ConnectionId, message: impl Into<Envelope>) -> bool {
        let result = self
            .state
            .read()
            .await
            .connections
            .send(connection_id, message.into());
        match result {
            Ok(()) => true,
            Err(TransportError::Closed(_)) => {
                self.disconnect(connection_id, DisconnectReason::TransportFailed).await;
                false
            }
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "Send skipped");
                false
            }
        }
    }

    /// Fans `message` out to a room, optionally skipping one connection.
    pub async fn broadcast(&self, room_id: &RoomId, message: ServerMessage, exclude: Option<&ConnectionId>) -> usize {
        let exclude: HashSet<ConnectionId> = exclude.into_iter().cloned().collect();
        let delivery = {
            let state = self.state.read().await;
            state.rooms.broadcast(&state.connections, room_id, message, &exclude)
        };
        let sent = delivery.sent;
        self.reap(delivery).await;
        sent
    }

    /// Direct message to every connection of `user_id`.
    pub async fn send_to_user(&self, user_id: &str, message: ServerMessage) -> usize {
        let delivery = {
            let state = self.state.read().await;
            let envelope = Envelope::new(message);
            let mut delivery = Delivery::default();
            for connection_id in state.connections.connections_of(user_id) {
                delivery.record(&connection_id, state.connections.send(&connection_id, envelope.clone()));
            }
            delivery
        };
        let sent = delivery.sent;
        tracing::debug!(%user_id, sent, "Direct message delivered");
        self.reap(delivery).await;
        sent
    }

    /// Pushes a notification to every subscribed connection whose filter
    /// accepts it. Returns the number of connections reached.
    pub async fn broadcast_notification(&self, notification: &Notification, event_type: &str) -> usize {
        let delivery = {
            let state = self.state.read().await;
            let envelope = Envelope::new(ServerMessage::Notification {
                event_type: event_type.to_string(),
                notification: notification.clone(),
            });
            let mut delivery = Delivery::default();
            for connection in state.connections.iter() {
                let accepted = connection
                    .subscription
                    .as_ref()
                    .is_some_and(|filter| filter.accepts(connection.user_id.as_deref(), notification));
                if accepted {
                    delivery.record(&connection.id, connection.push(Outbound::Message(envelope.clone())));
                }
            }
            delivery
        };
        let sent = delivery.sent;
        tracing::info!(notification_id = %notification.id, %event_type, sent, "Notification broadcast");
        self.reap(delivery).await;
        sent
    }

    /// Replaces (or with `None` clears) the connection's notification filter.
    pub async fn set_subscription(&self, connection_id: &ConnectionId, filter: Option<NotificationFilter>) -> bool {
        let mut state = self.state.write().await;
        match state.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.subscription = filter;
                true
            }
            None => false,
        }
    }

    // --- Rooms ---

    pub async fn join_room(&self, connection_id: &ConnectionId, room_id: &RoomId) -> Result<(), RoomError> {
        let delivery = {
            let mut state = self.state.write().await;
            let HubState { connections, rooms } = &mut *state;
            rooms.join(connections, connection_id, room_id)?
        };
        self.reap(delivery).await;
        Ok(())
    }

    /// Leaves a room and confirms with `room_left`. Returns `false` if the
    /// connection was not in the room.
    pub async fn leave_room(&self, connection_id: &ConnectionId, room_id: &RoomId) -> bool {
        let delivery = {
            let mut state = self.state.write().await;
            let HubState { connections, rooms } = &mut *state;
            match rooms.leave(connections, connection_id, room_id, false) {
                Some(delivery) => delivery,
                None => return false,
            }
        };
        self.reap(delivery).await;
        self.send(
            connection_id,
            Envelope::in_room(
                ServerMessage::RoomLeft {
                    room_id: room_id.clone(),
                },
                room_id,
            ),
        )
        .await;
        true
    }

    pub async fn update_presence(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
        update: PresenceUpdate,
    ) -> Result<usize, RoomError> {
        let delivery = {
            let mut state = self.state.write().await;
            let HubState { connections, rooms } = &mut *state;
            rooms.update_presence(connections, connection_id, room_id, update)?
        };
        let sent = delivery.sent;
        self.reap(delivery).await;
        Ok(sent)
    }

    pub async fn mark_active_resource(&self, room_id: &RoomId, resource: &str) -> bool {
        self.state.write().await.rooms.mark_active_resource(room_id, resource)
    }

    pub async fn require_membership(&self, connection_id: &ConnectionId, room_id: &RoomId) -> Result<(), RoomError> {
        self.state.read().await.rooms.require_member(connection_id, room_id)
    }

    pub async fn room_details(&self, room_id: &RoomId) -> Option<RoomDetails> {
        self.state.read().await.rooms.details(room_id)
    }

    pub async fn list_rooms(&self) -> Vec<RoomDetails> {
        self.state.read().await.rooms.list()
    }

    pub async fn ensure_room(&self, room_id: &RoomId, max_members: Option<usize>) -> bool {
        let created = self.state.write().await.rooms.ensure_room(room_id, max_members);
        tracing::info!(%room_id, ?max_members, created, "Persistent room ensured");
        created
    }

    pub async fn delete_room(&self, room_id: &RoomId) -> bool {
        let delivery = {
            let mut state = self.state.write().await;
            let HubState { connections, rooms } = &mut *state;
            rooms.delete_room(connections, room_id)
        };
        match delivery {
            Some(delivery) => {
                self.reap(delivery).await;
                true
            }
            None => false,
        }
    }

    // --- Liveness, sessions and limits ---

    /// Records a heartbeat ack without touching the session.
    pub async fn touch(&self, connection_id: &ConnectionId) -> bool {
        self.state
            .write()
            .await
            .connections
            .touch(connection_id, Instant::now())
    }

    /// Records a heartbeat ack and re-validates the connection's session.
    pub async fn record_heartbeat(&self, connection_id: &ConnectionId) -> Result<(), AuthError> {
        self.touch(connection_id).await;
        self.auth.refresh_session(connection_id).await?;
        Ok(())
    }

    /// Handles a transport-level heartbeat ack. A session whose token no longer
    /// verifies is disconnected; returns whether the connection is still up.
    pub async fn acknowledge_heartbeat(&self, connection_id: &ConnectionId) -> bool {
        match self.record_heartbeat(connection_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(%connection_id, error = %e, "Session no longer valid");
                self.disconnect(connection_id, DisconnectReason::SessionExpired)
                    .await;
                false
            }
        }
    }

    /// Re-validates every listed session, disconnecting the ones that fail.
    async fn revalidate_sessions(&self, connection_ids: &[ConnectionId]) -> usize {
        let mut expired = 0;
        for connection_id in connection_ids {
            match self.auth.refresh_session(connection_id).await {
                Ok(_) => {}
                // Already being torn down.
                Err(AuthError::NoSession(_)) => {}
                Err(e) => {
                    tracing::info!(%connection_id, error = %e, "Session expired, disconnecting");
                    if self
                        .disconnect(connection_id, DisconnectReason::SessionExpired)
                        .await
                    {
                        expired += 1;
                    }
                }
            }
        }
        expired
    }

    pub async fn check_message_rate(&self, user_id: &str) -> Result<(), RateLimitError> {
        self.message_limiter.lock().await.check(user_id, Instant::now())
    }

    pub async fn check_permission(&self, connection_id: &ConnectionId, action: &'static str) -> Result<(), RealtimeError> {
        self.auth.check_permission(connection_id, action).await
    }

    // --- Heartbeat ---

    async fn ensure_heartbeat(self: &Arc<Self>) {
        let mut running = self.heartbeat_running.lock().await;
        if *running {
            return;
        }
        let hub = Arc::clone(self);
        *running = self
            .tasks
            .spawn("heartbeat", async move { hub.heartbeat_loop().await })
            .await;
        if *running {
            tracing::debug!(interval_secs = self.config.heartbeat_interval().as_secs(), "Heartbeat started");
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            if !self.heartbeat_tick().await {
                tracing::debug!("No connections left, heartbeat stopped");
                break;
            }
        }
    }

    /// One heartbeat round. Returns `false` (and marks the loop stopped) when
    /// there is nobody left to ping.
    pub(crate) async fn heartbeat_tick(&self) -> bool {
        let now = Instant::now();
        let (stale, live) = {
            let mut running = self.heartbeat_running.lock().await;
            let state = self.state.read().await;
            if state.connections.is_empty() {
                *running = false;
                return false;
            }
            let stale = state.connections.stale(now, self.config.stale_timeout());
            let live: Vec<ConnectionId> = state
                .connections
                .ids()
                .into_iter()
                .filter(|id| !stale.contains(id))
                .collect();
            (stale, live)
        };

        for connection_id in &stale {
            tracing::warn!(%connection_id, "Connection missed heartbeats, disconnecting");
            self.disconnect(connection_id, DisconnectReason::Stale).await;
        }
        let expired = self.revalidate_sessions(&live).await;

        let delivery = {
            let state = self.state.read().await;
            let heartbeat = Envelope::new(ServerMessage::Heartbeat {});
            let mut delivery = Delivery::default();
            for connection in state.connections.iter().filter(|c| live.contains(&c.id)) {
                delivery.record(&connection.id, connection.push(Outbound::Message(heartbeat.clone())));
                let _ = connection.push(Outbound::Ping);
            }
            delivery
        };
        tracing::trace!(sent = delivery.sent, stale = stale.len(), expired, "Heartbeat round");
        self.reap(delivery).await;
        true
    }

    // --- Admin ---

    pub async fn stats(&self) -> HubStats {
        let now = Instant::now();
        let (total_connections, unique_users, total_rooms, room_sizes) = {
            let state = self.state.read().await;
            let room_sizes = state
                .rooms
                .list()
                .into_iter()
                .map(|room| (room.room_id, room.total_users))
                .collect();
            (
                state.connections.len(),
                state.connections.user_count(),
                state.rooms.len(),
                room_sizes,
            )
        };
        let (rate_limited_identities, blocked_identities) = {
            let limiter = self.message_limiter.lock().await;
            (limiter.len(), limiter.blocked_count(now))
        };
        HubStats {
            total_connections,
            unique_users,
            total_rooms,
            active_sessions: self.auth.session_count().await,
            room_sizes,
            rate_limited_identities,
            blocked_identities,
            heartbeat_running: *self.heartbeat_running.lock().await,
            background_tasks: self.tasks.len().await,
        }
    }

    /// Stops background work and closes every connection.
    pub async fn shutdown(&self) {
        self.tasks.signal_shutdown();
        let ids = self.state.read().await.connections.ids();
        tracing::info!(connections = ids.len(), "Shutting down realtime hub");
        for connection_id in ids {
            self.disconnect(&connection_id, DisconnectReason::Shutdown).await;
        }
        self.tasks.shutdown(SHUTDOWN_GRACE).await;
    }
}
