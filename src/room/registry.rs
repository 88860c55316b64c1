use std::collections::{HashMap, HashSet};

use super::{
    Member, Room, RoomDetails,
    error::RoomError,
    presence::{Presence, PresenceUpdate},
};
use crate::{
    ConnectionId, RoomId,
    connection::{ConnectionRegistry, Delivery},
    message::{Envelope, ServerMessage},
};

/// Named groups of connected users.
///
/// Join and leave are the only operations that change membership, and they
/// update the room and the connection's room set together, so both sides
/// always agree. Sends never block: transport failures are collected in the
/// returned [`Delivery`] for the caller to clean up.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    default_max_members: Option<usize>,
}

impl RoomRegistry {
    pub fn new(default_max_members: Option<usize>) -> Self {
        RoomRegistry {
            rooms: HashMap::new(),
            default_max_members,
        }
    }

    /// Joins `connection_id` to `room_id`, creating the room on demand.
    ///
    /// Existing members (other than the joiner) receive `user_joined` when the
    /// user is new to the room; the joiner always receives `room_state`.
    pub fn join(
        &mut self,
        connections: &mut ConnectionRegistry,
        connection_id: &ConnectionId,
        room_id: &RoomId,
    ) -> Result<Delivery, RoomError> {
        let connection = connections
            .get(connection_id)
            .ok_or_else(|| RoomError::ConnectionNotFound(connection_id.clone()))?;
        let user_id = connection
            .user_id
            .clone()
            .filter(|_| connection.authenticated)
            .ok_or_else(|| RoomError::Unauthenticated(connection_id.clone()))?;
        let username = connection.username.clone();

        let (newly_member, total_users) = {
            let created = !self.rooms.contains_key(room_id);
            let default_max = self.default_max_members;
            let room = self
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| Room::new(default_max, false));

            if room.is_full_for(&user_id) {
                let max_members = room.max_members.unwrap_or_default();
                if created {
                    self.rooms.remove(room_id);
                }
                tracing::info!(%connection_id, %room_id, max_members, "Join rejected, room is full");
                return Err(RoomError::RoomFull {
                    room_id: room_id.clone(),
                    max_members,
                });
            }

            let newly_member = !room.members.contains_key(&user_id);
            room.members
                .entry(user_id.clone())
                .or_insert_with(|| Member {
                    presence: Presence::new(user_id.clone(), username.clone()),
                    connections: HashSet::new(),
                })
                .connections
                .insert(connection_id.clone());
            room.touch();
            (newly_member, room.members.len())
        };

        if let Some(connection) = connections.get_mut(connection_id) {
            connection.rooms.insert(room_id.clone());
        }

        let mut delivery = Delivery::default();
        if newly_member {
            tracing::info!(%connection_id, %user_id, %room_id, total_users, "User joined room");
            let exclude = HashSet::from([connection_id.clone()]);
            delivery.merge(self.broadcast(
                connections,
                room_id,
                ServerMessage::UserJoined {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    username,
                    total_users,
                },
                &exclude,
            ));
        }

        if let Some(state) = self.room_state(room_id, &user_id) {
            let result = connections.send(connection_id, Envelope::in_room(state, room_id));
            delivery.record(connection_id, result);
        }
        Ok(delivery)
    }

    /// Removes `connection_id` from `room_id`. Returns `None` if it was not joined.
    ///
    /// The user's presence goes away with their last connection in the room;
    /// remaining members hear `user_left` unless `silent`. Empty rooms are
    /// deleted unless persistent.
    pub fn leave(
        &mut self,
        connections: &mut ConnectionRegistry,
        connection_id: &ConnectionId,
        room_id: &RoomId,
        silent: bool,
    ) -> Option<Delivery> {
        if let Some(connection) = connections.get_mut(connection_id) {
            connection.rooms.remove(room_id);
        }

        let room = self.rooms.get_mut(room_id)?;
        let user_id = room
            .members
            .iter()
            .find(|(_, member)| member.connections.contains(connection_id))
            .map(|(user_id, _)| user_id.clone())?;

        let user_gone = match room.members.get_mut(&user_id) {
            Some(member) => {
                member.connections.remove(connection_id);
                member.connections.is_empty()
            }
            None => false,
        };
        if user_gone {
            room.members.remove(&user_id);
        }
        room.touch();
        let total_users = room.members.len();

        if room.is_empty() && !room.persistent {
            self.rooms.remove(room_id);
            tracing::debug!(%room_id, "Removed empty room");
            return Some(Delivery::default());
        }

        if user_gone && !silent {
            tracing::info!(%connection_id, %user_id, %room_id, total_users, "User left room");
            Some(self.broadcast(
                connections,
                room_id,
                ServerMessage::UserLeft {
                    room_id: room_id.clone(),
                    user_id,
                    total_users,
                },
                &HashSet::new(),
            ))
        } else {
            tracing::debug!(%connection_id, %user_id, %room_id, silent, "Connection left room");
            Some(Delivery::default())
        }
    }

    /// Sends `message` to every joined connection not in `exclude`.
    /// An unknown room is a no-op with nothing sent.
    pub fn broadcast(
        &self,
        connections: &ConnectionRegistry,
        room_id: &RoomId,
        message: ServerMessage,
        exclude: &HashSet<ConnectionId>,
    ) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(room) = self.rooms.get(room_id) else {
            return delivery;
        };

        let envelope = Envelope::in_room(message, room_id);
        for connection_id in room.connection_ids().filter(|id| !exclude.contains(*id)) {
            delivery.record(connection_id, connections.send(connection_id, envelope.clone()));
        }
        tracing::trace!(%room_id, sent = delivery.sent, failed = delivery.failed, "Room broadcast");
        delivery
    }

    /// Updates the sender's presence and tells the rest of the room.
    pub fn update_presence(
        &mut self,
        connections: &ConnectionRegistry,
        connection_id: &ConnectionId,
        room_id: &RoomId,
        update: PresenceUpdate,
    ) -> Result<Delivery, RoomError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;
        let (user_id, member) = room
            .members
            .iter_mut()
            .find(|(_, member)| member.connections.contains(connection_id))
            .ok_or_else(|| RoomError::NotInRoom {
                connection_id: connection_id.clone(),
                room_id: room_id.clone(),
            })?;
        let user_id = user_id.clone();
        let changed = member.presence.apply_update(update.clone());
        room.touch();
        if !changed {
            tracing::trace!(%room_id, %user_id, "Presence unchanged, nothing to broadcast");
            return Ok(Delivery::default());
        }

        let message = match update {
            PresenceUpdate::Status(status) => ServerMessage::StatusChanged {
                room_id: room_id.clone(),
                user_id,
                status,
            },
            PresenceUpdate::Cursor(cursor) => ServerMessage::CursorMoved {
                room_id: room_id.clone(),
                user_id,
                x: cursor.x,
                y: cursor.y,
                cell: cursor.cell,
            },
        };
        let exclude = HashSet::from([connection_id.clone()]);
        Ok(self.broadcast(connections, room_id, message, &exclude))
    }

    pub fn require_member(&self, connection_id: &ConnectionId, room_id: &RoomId) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;
        if room.has_connection(connection_id) {
            Ok(())
        } else {
            Err(RoomError::NotInRoom {
                connection_id: connection_id.clone(),
                room_id: room_id.clone(),
            })
        }
    }

    /// Tags a resource (e.g. a sheet id) as being edited in the room.
    pub fn mark_active_resource(&mut self, room_id: &RoomId, resource: &str) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) => {
                room.touch();
                room.active_resources.insert(resource.to_string())
            }
            None => false,
        }
    }

    /// Snapshot sent to a joiner: everyone except `for_user`.
    pub fn room_state(&self, room_id: &RoomId, for_user: &str) -> Option<ServerMessage> {
        let room = self.rooms.get(room_id)?;
        let mut users: Vec<_> = room
            .presences()
            .filter(|presence| presence.user_id != for_user)
            .map(Presence::view)
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Some(ServerMessage::RoomState {
            room_id: room_id.clone(),
            users,
            active_resources: room.active_resources.iter().cloned().collect(),
            total_users: room.members.len(),
        })
    }

    /// Creates a persistent room, or marks an existing one persistent.
    /// Returns `true` if the room was newly created.
    pub fn ensure_room(&mut self, room_id: &RoomId, max_members: Option<usize>) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) => {
                room.persistent = true;
                if max_members.is_some() {
                    room.max_members = max_members;
                }
                false
            }
            None => {
                self.rooms.insert(room_id.clone(), Room::new(max_members, true));
                true
            }
        }
    }

    /// Deletes a room outright, detaching every joined connection and telling
    /// each of them with `room_left`.
    pub fn delete_room(&mut self, connections: &mut ConnectionRegistry, room_id: &RoomId) -> Option<Delivery> {
        let room = self.rooms.remove(room_id)?;
        let mut delivery = Delivery::default();
        for connection_id in room.connection_ids() {
            if let Some(connection) = connections.get_mut(connection_id) {
                connection.rooms.remove(room_id);
            }
            let result = connections.send(
                connection_id,
                Envelope::in_room(
                    ServerMessage::RoomLeft {
                        room_id: room_id.clone(),
                    },
                    room_id,
                ),
            );
            delivery.record(connection_id, result);
        }
        tracing::info!(%room_id, notified = delivery.sent, "Room deleted");
        Some(delivery)
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn details(&self, room_id: &RoomId) -> Option<RoomDetails> {
        self.rooms.get(room_id).map(|room| room.details(room_id))
    }

    pub fn list(&self) -> Vec<RoomDetails> {
        let mut rooms: Vec<_> = self
            .rooms
            .iter()
            .map(|(room_id, room)| room.details(room_id))
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::{Outbound, tests::register},
        room::presence::{Cursor, PresenceStatus},
    };
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Message(envelope) = item {
                out.push(serde_json::to_value(&envelope).unwrap());
            }
        }
        out
    }

    fn types(messages: &[Value]) -> Vec<String> {
        messages
            .iter()
            .map(|m| m["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn id(s: &str) -> String {
        s.to_string()
    }

    fn assert_consistent(rooms: &RoomRegistry, connections: &ConnectionRegistry) {
        for connection in connections.iter() {
            for (room_id, room) in &rooms.rooms {
                assert_eq!(
                    connection.rooms.contains(room_id),
                    room.has_connection(&connection.id),
                    "connection {} / room {room_id}",
                    connection.id
                );
            }
            for room_id in &connection.rooms {
                let room = rooms.get(room_id).expect("joined room exists");
                assert!(room.is_member(connection.user_id.as_deref().unwrap()));
            }
        }
        for room in rooms.rooms.values() {
            for presence in room.presences() {
                let joined = connections
                    .connections_of(&presence.user_id)
                    .iter()
                    .any(|c| room.has_connection(c));
                assert!(joined, "presence without a joined connection");
            }
        }
    }

    #[test]
    fn test_membership_stays_consistent_across_join_and_leave() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _rx = [
            register(&mut connections, "a1", "alice"),
            register(&mut connections, "a2", "alice"),
            register(&mut connections, "b1", "bob"),
        ];

        let steps: [(&str, &str, bool); 9] = [
            ("a1", "r1", true),
            ("a2", "r1", true),
            ("b1", "r1", true),
            ("a1", "r2", true),
            ("a1", "r1", false),
            ("b1", "r2", true),
            ("a2", "r1", false),
            ("a1", "r2", false),
            ("b1", "r1", false),
        ];
        for (connection_id, room_id, join) in steps {
            if join {
                rooms.join(&mut connections, &id(connection_id), &id(room_id)).unwrap();
            } else {
                rooms.leave(&mut connections, &id(connection_id), &id(room_id), false);
            }
            assert_consistent(&rooms, &connections);
        }

        assert!(!rooms.contains(&id("r1")));
        assert_eq!(rooms.get(&id("r2")).unwrap().member_count(), 1);
    }

    #[test]
    fn test_join_sends_state_and_notifies_others() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let mut a = register(&mut connections, "a1", "alice");
        let mut b = register(&mut connections, "b1", "bob");

        rooms.join(&mut connections, &id("a1"), &id("sheet-42")).unwrap();
        let first = drain(&mut a);
        assert_eq!(types(&first), vec!["room_state"]);
        assert_eq!(first[0]["data"]["users"].as_array().unwrap().len(), 0);
        assert_eq!(first[0]["data"]["total_users"], 1);

        rooms.join(&mut connections, &id("b1"), &id("sheet-42")).unwrap();
        let to_a = drain(&mut a);
        assert_eq!(types(&to_a), vec!["user_joined"]);
        assert_eq!(to_a[0]["data"]["user_id"], "bob");
        assert_eq!(to_a[0]["data"]["total_users"], 2);

        let to_b = drain(&mut b);
        assert_eq!(types(&to_b), vec!["room_state"]);
        assert_eq!(to_b[0]["data"]["users"][0]["user_id"], "alice");
    }

    #[test]
    fn test_second_tab_does_not_announce_user_again() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let mut a1 = register(&mut connections, "a1", "alice");
        let _a2 = register(&mut connections, "a2", "alice");
        let mut b = register(&mut connections, "b1", "bob");

        rooms.join(&mut connections, &id("b1"), &id("r")).unwrap();
        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        drain(&mut b);
        drain(&mut a1);
        rooms.join(&mut connections, &id("a2"), &id("r")).unwrap();
        assert!(drain(&mut b).is_empty());

        // Alice is still present through a2.
        rooms.leave(&mut connections, &id("a1"), &id("r"), false).unwrap();
        assert!(drain(&mut b).is_empty());
        assert!(rooms.get(&id("r")).unwrap().is_member("alice"));
    }

    #[test]
    fn test_full_room_rejects_join_without_changes() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(Some(1));
        let _a = register(&mut connections, "a1", "alice");
        let _a2 = register(&mut connections, "a2", "alice");
        let mut b = register(&mut connections, "b1", "bob");

        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        let err = rooms.join(&mut connections, &id("b1"), &id("r")).unwrap_err();
        assert!(matches!(err, RoomError::RoomFull { max_members: 1, .. }));
        assert_eq!(rooms.get(&id("r")).unwrap().member_count(), 1);
        assert!(connections.get(&id("b1")).unwrap().rooms.is_empty());
        assert!(drain(&mut b).is_empty());

        // Another connection of an existing member is not a new member.
        rooms.join(&mut connections, &id("a2"), &id("r")).unwrap();
        assert_consistent(&rooms, &connections);
    }

    #[test]
    fn test_zero_capacity_room_is_not_left_behind() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(Some(0));
        let _a = register(&mut connections, "a1", "alice");
        assert!(rooms.join(&mut connections, &id("a1"), &id("r")).is_err());
        assert!(!rooms.contains(&id("r")));
    }

    #[test]
    fn test_last_leave_deletes_room_and_broadcast_is_noop() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _a = register(&mut connections, "a1", "alice");

        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        assert!(rooms.leave(&mut connections, &id("a1"), &id("r"), false).is_some());
        assert!(!rooms.contains(&id("r")));

        let delivery = rooms.broadcast(&connections, &id("r"), ServerMessage::Heartbeat {}, &HashSet::new());
        assert_eq!(delivery.sent, 0);
        assert!(rooms.leave(&mut connections, &id("a1"), &id("r"), false).is_none());
    }

    #[test]
    fn test_persistent_room_survives_being_empty() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _a = register(&mut connections, "a1", "alice");

        assert!(rooms.ensure_room(&id("lobby"), Some(10)));
        assert!(!rooms.ensure_room(&id("lobby"), None));
        rooms.join(&mut connections, &id("a1"), &id("lobby")).unwrap();
        rooms.leave(&mut connections, &id("a1"), &id("lobby"), false).unwrap();

        let room = rooms.get(&id("lobby")).unwrap();
        assert!(room.is_empty());
        assert_eq!(room.max_members(), Some(10));
    }

    #[test]
    fn test_silent_leave_does_not_broadcast() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _a = register(&mut connections, "a1", "alice");
        let mut b = register(&mut connections, "b1", "bob");
        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        rooms.join(&mut connections, &id("b1"), &id("r")).unwrap();
        drain(&mut b);

        rooms.leave(&mut connections, &id("a1"), &id("r"), true).unwrap();
        assert!(drain(&mut b).is_empty());
        assert!(!rooms.get(&id("r")).unwrap().is_member("alice"));

        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        drain(&mut b);
        rooms.leave(&mut connections, &id("a1"), &id("r"), false).unwrap();
        let left = drain(&mut b);
        assert_eq!(types(&left), vec!["user_left"]);
        assert_eq!(left[0]["data"]["total_users"], 1);
    }

    #[test]
    fn test_cursor_update_reaches_everyone_but_sender() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let mut a = register(&mut connections, "a1", "alice");
        let mut b = register(&mut connections, "b1", "bob");
        let mut c = register(&mut connections, "c1", "carol");
        for conn in ["a1", "b1", "c1"] {
            rooms.join(&mut connections, &id(conn), &id("r")).unwrap();
        }
        drain(&mut a);
        drain(&mut b);
        drain(&mut c);

        let cursor = Cursor { x: 120.5, y: 48.0, cell: Some("D7".into()) };
        let delivery = rooms
            .update_presence(&connections, &id("a1"), &id("r"), PresenceUpdate::Cursor(cursor))
            .unwrap();
        assert_eq!(delivery.sent, 2);
        assert!(drain(&mut a).is_empty());
        for rx in [&mut b, &mut c] {
            let got = drain(rx);
            assert_eq!(types(&got), vec!["cursor_moved"]);
            assert_eq!(got[0]["data"]["user_id"], "alice");
            assert_eq!(got[0]["data"]["x"], 120.5);
            assert_eq!(got[0]["data"]["y"], 48.0);
            assert_eq!(got[0]["data"]["cell"], "D7");
        }

        rooms
            .update_presence(&connections, &id("b1"), &id("r"), PresenceUpdate::Status(PresenceStatus::Away))
            .unwrap();
        let got = drain(&mut a);
        assert_eq!(got[0]["type"], "status_changed");
        assert_eq!(got[0]["data"]["status"], "away");
    }

    #[test]
    fn test_unchanged_presence_is_not_rebroadcast() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _a = register(&mut connections, "a1", "alice");
        let mut b = register(&mut connections, "b1", "bob");
        for conn in ["a1", "b1"] {
            rooms.join(&mut connections, &id(conn), &id("r")).unwrap();
        }
        drain(&mut b);

        let cursor = Cursor { x: 3.0, y: 4.0, cell: None };
        let first = rooms
            .update_presence(&connections, &id("a1"), &id("r"), PresenceUpdate::Cursor(cursor.clone()))
            .unwrap();
        let repeat = rooms
            .update_presence(&connections, &id("a1"), &id("r"), PresenceUpdate::Cursor(cursor))
            .unwrap();
        // Members start online.
        let online = rooms
            .update_presence(&connections, &id("a1"), &id("r"), PresenceUpdate::Status(PresenceStatus::Online))
            .unwrap();
        assert_eq!((first.sent, repeat.sent, online.sent), (1, 0, 0));
        assert_eq!(types(&drain(&mut b)), vec!["cursor_moved"]);
    }

    #[test]
    fn test_presence_update_requires_membership() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _a = register(&mut connections, "a1", "alice");
        let _b = register(&mut connections, "b1", "bob");
        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();

        let update = PresenceUpdate::Status(PresenceStatus::Busy);
        assert!(matches!(
            rooms.update_presence(&connections, &id("b1"), &id("r"), update.clone()),
            Err(RoomError::NotInRoom { .. })
        ));
        assert!(matches!(
            rooms.update_presence(&connections, &id("a1"), &id("nope"), update),
            Err(RoomError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_broadcast_counts_dead_connections() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _a = register(&mut connections, "a1", "alice");
        let b = register(&mut connections, "b1", "bob");
        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        rooms.join(&mut connections, &id("b1"), &id("r")).unwrap();
        drop(b);

        let delivery = rooms.broadcast(&connections, &id("r"), ServerMessage::Heartbeat {}, &HashSet::new());
        assert_eq!(delivery.sent, 1);
        assert_eq!(delivery.dead, vec![id("b1")]);
    }

    #[test]
    fn test_delete_room_detaches_connections() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let mut a = register(&mut connections, "a1", "alice");
        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        drain(&mut a);

        let delivery = rooms.delete_room(&mut connections, &id("r")).unwrap();
        assert_eq!(delivery.sent, 1);
        assert_eq!(types(&drain(&mut a)), vec!["room_left"]);
        assert!(connections.get(&id("a1")).unwrap().rooms.is_empty());
        assert!(rooms.delete_room(&mut connections, &id("r")).is_none());
    }

    #[test]
    fn test_room_state_lists_active_resources() {
        let mut connections = ConnectionRegistry::new();
        let mut rooms = RoomRegistry::new(None);
        let _a = register(&mut connections, "a1", "alice");
        rooms.join(&mut connections, &id("a1"), &id("r")).unwrap();
        assert!(rooms.mark_active_resource(&id("r"), "sheet-1"));
        assert!(!rooms.mark_active_resource(&id("r"), "sheet-1"));

        match rooms.room_state(&id("r"), "bob").unwrap() {
            ServerMessage::RoomState { users, active_resources, total_users, .. } => {
                assert_eq!(users.len(), 1);
                assert_eq!(active_resources, vec!["sheet-1".to_string()]);
                assert_eq!(total_users, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
