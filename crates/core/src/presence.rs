use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::resource_id::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Editor,
    Viewer,
}

impl Mode {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "editor" => Some(Self::Editor),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveReason {
    Manual,
    Disconnect,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUser {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub socket_id: String,
    pub joined_at: i64,
    pub mode: Mode,
    pub last_activity_at: i64,
}

/// One resource's occupant map, keyed by socket id. Never stored empty —
/// the owning `PresenceRegistry` removes a room as soon as it is.
#[derive(Debug, Default, Clone)]
pub struct Room {
    users: HashMap<String, ResourceUser>,
}

impl Room {
    #[must_use]
    pub fn users(&self) -> Vec<&ResourceUser> {
        self.users.values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    #[must_use]
    pub fn contains(&self, socket_id: &str) -> bool {
        self.users.contains_key(socket_id)
    }
}

pub enum JoinOutcome {
    /// Already a member; carries the current occupant list for the
    /// idempotency surface spec §4.F requires on a duplicate join.
    AlreadyJoined(Vec<ResourceUser>),
    Joined { users: Vec<ResourceUser> },
}

pub enum LeaveOutcome {
    NotJoined,
    Left,
}

/// In-memory registry of all rooms. Pure domain logic: no broadcast, no
/// socket I/O. The gateway's presence engine wraps this with the actual
/// fan-out to connected sockets.
#[derive(Default)]
pub struct PresenceRegistry {
    rooms: HashMap<ResourceId, Room>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, resource: &ResourceId, user: ResourceUser) -> JoinOutcome {
        let room = self.rooms.entry(resource.clone()).or_default();
        if room.contains(&user.socket_id) {
            return JoinOutcome::AlreadyJoined(room.users().into_iter().cloned().collect());
        }
        room.users.insert(user.socket_id.clone(), user);
        JoinOutcome::Joined {
            users: room.users().into_iter().cloned().collect(),
        }
    }

    pub fn leave(&mut self, resource: &ResourceId, socket_id: &str) -> LeaveOutcome {
        let Some(room) = self.rooms.get_mut(resource) else {
            return LeaveOutcome::NotJoined;
        };
        if room.users.remove(socket_id).is_none() {
            return LeaveOutcome::NotJoined;
        }
        if room.is_empty() {
            self.rooms.remove(resource);
        }
        LeaveOutcome::Left
    }

    #[must_use]
    pub fn room(&self, resource: &ResourceId) -> Option<&Room> {
        self.rooms.get(resource)
    }

    /// All sub-resources sharing `parent`'s `type:id`, each with its
    /// occupant list, for the `resource:all_users` cross-tab snapshot.
    #[must_use]
    pub fn sub_resources_of(&self, parent: &ResourceId) -> Vec<(ResourceId, Vec<ResourceUser>)> {
        self.rooms
            .iter()
            .filter(|(id, _)| id.is_sub_resource() && id.parent() == *parent)
            .map(|(id, room)| (id.clone(), room.users().into_iter().cloned().collect()))
            .collect()
    }

    /// Removes `socket_id` from every room it occupies, returning the
    /// resources it was removed from so the caller can broadcast
    /// `user:left` per room and release any locks it held.
    pub fn remove_connection(&mut self, socket_id: &str) -> Vec<ResourceId> {
        let mut left = Vec::new();
        self.rooms.retain(|resource, room| {
            if room.users.remove(socket_id).is_some() {
                left.push(resource.clone());
            }
            !room.is_empty()
        });
        left
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(socket_id: &str, mode: Mode) -> ResourceUser {
        ResourceUser {
            user_id: format!("user-{socket_id}"),
            username: format!("user-{socket_id}"),
            email: None,
            socket_id: socket_id.to_string(),
            joined_at: 0,
            mode,
            last_activity_at: 0,
        }
    }

    #[test]
    fn duplicate_join_is_rejected_idempotently() {
        let mut reg = PresenceRegistry::new();
        let r = ResourceId::root("doc", "1");
        assert!(matches!(
            reg.join(&r, user("s1", Mode::Editor)),
            JoinOutcome::Joined { .. }
        ));
        assert!(matches!(
            reg.join(&r, user("s1", Mode::Editor)),
            JoinOutcome::AlreadyJoined(_)
        ));
        assert_eq!(reg.room(&r).unwrap().len(), 1);
    }

    #[test]
    fn leave_then_leave_again_reports_not_joined() {
        let mut reg = PresenceRegistry::new();
        let r = ResourceId::root("doc", "1");
        reg.join(&r, user("s1", Mode::Editor));
        assert!(matches!(reg.leave(&r, "s1"), LeaveOutcome::Left));
        assert!(matches!(reg.leave(&r, "s1"), LeaveOutcome::NotJoined));
        assert!(reg.room(&r).is_none());
    }

    #[test]
    fn empty_room_is_purged() {
        let mut reg = PresenceRegistry::new();
        let r = ResourceId::root("doc", "1");
        reg.join(&r, user("s1", Mode::Editor));
        reg.leave(&r, "s1");
        assert_eq!(reg.room_count(), 0);
    }

    #[test]
    fn sub_resources_enumerate_siblings_under_shared_parent() {
        let mut reg = PresenceRegistry::new();
        let tab_a = ResourceId::with_sub("doc", "42", "tab", "A");
        let tab_b = ResourceId::with_sub("doc", "42", "tab", "B");
        reg.join(&tab_a, user("alice", Mode::Editor));
        reg.join(&tab_b, user("bob", Mode::Viewer));

        let parent = ResourceId::root("doc", "42");
        let mut subs = reg.sub_resources_of(&parent);
        subs.sort_by(|a, b| a.0.build().cmp(&b.0.build()));
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].0.build(), "doc:42/tab:A");
        assert_eq!(subs[1].0.build(), "doc:42/tab:B");
        let total: usize = subs.iter().map(|(_, users)| users.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn disconnect_removes_connection_from_every_room_it_occupied() {
        let mut reg = PresenceRegistry::new();
        let r1 = ResourceId::root("doc", "1");
        let r2 = ResourceId::root("doc", "2");
        reg.join(&r1, user("s1", Mode::Editor));
        reg.join(&r2, user("s1", Mode::Viewer));
        reg.join(&r2, user("s2", Mode::Editor));

        let mut left = reg.remove_connection("s1");
        left.sort_by(|a, b| a.build().cmp(&b.build()));
        assert_eq!(left.len(), 2);
        assert!(reg.room(&r1).is_none());
        assert_eq!(reg.room(&r2).unwrap().len(), 1);
    }
}
