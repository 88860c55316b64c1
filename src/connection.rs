//! Live socket bookkeeping: per-connection metadata and the user index.

use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};

use crate::{
    ConnectionId, RoomId, UserId,
    auth::Identity,
    error::TransportError,
    message::Envelope,
    subscription::NotificationFilter,
};

/// What the socket writer task is asked to do.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(Envelope),
    /// Transport-level ping frame.
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub authenticated: bool,
    pub peer: Option<IpAddr>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
    pub rooms: HashSet<RoomId>,
    pub subscription: Option<NotificationFilter>,
    outbound: mpsc::Sender<Outbound>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        identity: &Identity,
        peer: Option<IpAddr>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id,
            user_id: Some(identity.user_id.clone()),
            username: identity.username.clone(),
            authenticated: true,
            peer,
            connected_at: Utc::now(),
            last_heartbeat: Instant::now(),
            rooms: HashSet::new(),
            subscription: None,
            outbound,
        }
    }

    pub fn push(&self, item: Outbound) -> Result<(), TransportError> {
        self.outbound.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backlogged(self.id.clone()),
            TrySendError::Closed(_) => TransportError::Closed(self.id.clone()),
        })
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }
}

/// Result of a fan-out. `dead` lists connections whose transport is gone and
/// must be disconnected once the registry lock is released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed: usize,
    pub dead: Vec<ConnectionId>,
}

impl Delivery {
    pub fn record(&mut self, connection_id: &ConnectionId, result: Result<(), TransportError>) {
        match result {
            Ok(()) => self.sent += 1,
            Err(TransportError::Closed(_)) => {
                self.failed += 1;
                self.dead.push(connection_id.clone());
            }
            Err(e) => {
                tracing::warn!(%connection_id, error = %e, "Dropping message");
                self.failed += 1;
            }
        }
    }

    pub fn merge(&mut self, other: Delivery) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.dead.extend(other.dead);
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: Connection) {
        if let Some(user_id) = &connection.user_id {
            self.by_user
                .entry(user_id.clone())
                .or_default()
                .insert(connection.id.clone());
        }
        self.connections.insert(connection.id.clone(), connection);
    }

    /// Removes the connection and its user index entry. Room membership must
    /// already have been released by the caller.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(connection_id)?;
        if let Some(user_id) = &connection.user_id {
            if let Some(ids) = self.by_user.get_mut(user_id) {
                ids.remove(connection_id);
                if ids.is_empty() {
                    self.by_user.remove(user_id);
                }
            }
        }
        Some(connection)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(connection_id)
    }

    pub fn get_mut(&mut self, connection_id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(connection_id)
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Best-effort, non-blocking send.
    pub fn send(&self, connection_id: &ConnectionId, envelope: Envelope) -> Result<(), TransportError> {
        self.push(connection_id, Outbound::Message(envelope))
    }

    pub fn push(&self, connection_id: &ConnectionId, item: Outbound) -> Result<(), TransportError> {
        self.connections
            .get(connection_id)
            .ok_or_else(|| TransportError::NotConnected(connection_id.clone()))?
            .push(item)
    }

    /// Marks a heartbeat ack. Returns false for unknown connections.
    pub fn touch(&mut self, connection_id: &ConnectionId, now: Instant) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_stale(now, timeout))
            .map(|c| c.id.clone())
            .collect()
    }
}
