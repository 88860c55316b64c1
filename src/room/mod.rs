pub mod error;
pub mod presence;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{ConnectionId, RoomId, UserId};
use presence::{Presence, PresenceView};

pub use registry::RoomRegistry;

/// A joined user: their presence plus every connection they joined with.
#[derive(Debug, Clone)]
struct Member {
    presence: Presence,
    connections: HashSet<ConnectionId>,
}

// --- Room Structure ---

/// Represents a single collaboration room (typically one document).
#[derive(Debug, Clone)]
pub struct Room {
    members: HashMap<UserId, Member>,
    active_resources: BTreeSet<String>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    max_members: Option<usize>,
    persistent: bool,
}

impl Room {
    fn new(max_members: Option<usize>, persistent: bool) -> Self {
        let now = Utc::now();
        Room {
            members: HashMap::new(),
            active_resources: BTreeSet::new(),
            created_at: now,
            last_activity: now,
            max_members,
            persistent,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn is_full_for(&self, user_id: &str) -> bool {
        match self.max_members {
            Some(max) => !self.members.contains_key(user_id) && self.members.len() >= max,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn has_connection(&self, connection_id: &ConnectionId) -> bool {
        self.members
            .values()
            .any(|member| member.connections.contains(connection_id))
    }

    pub fn presence(&self, user_id: &str) -> Option<&Presence> {
        self.members.get(user_id).map(|member| &member.presence)
    }

    /// Every joined connection, across all members.
    pub fn connection_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.values().flat_map(|member| member.connections.iter())
    }

    pub fn presences(&self) -> impl Iterator<Item = &Presence> {
        self.members.values().map(|member| &member.presence)
    }

    pub fn active_resources(&self) -> &BTreeSet<String> {
        &self.active_resources
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn max_members(&self) -> Option<usize> {
        self.max_members
    }

    pub fn details(&self, room_id: &RoomId) -> RoomDetails {
        let mut users: Vec<PresenceView> = self.presences().map(Presence::view).collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        RoomDetails {
            room_id: room_id.clone(),
            total_users: self.members.len(),
            connection_count: self.connection_ids().count(),
            users,
            active_resources: self.active_resources.iter().cloned().collect(),
            max_members: self.max_members,
            persistent: self.persistent,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Detailed information about a room
#[derive(Debug, Clone, Serialize)]
pub struct RoomDetails {
    pub room_id: RoomId,
    pub total_users: usize,
    pub connection_count: usize,
    pub users: Vec<PresenceView>,
    pub active_resources: Vec<String>,
    pub max_members: Option<usize>,
    pub persistent: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
