use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::json;
use tracing::info;

use collab_core::events::{LOCK_RELEASED, RESOURCE_ALL_USERS, RESOURCE_JOINED, RESOURCE_LEFT, USER_JOINED, USER_LEFT};
use collab_core::{GatewayError, GatewayResult, JoinOutcome, LeaveOutcome, LeaveReason, LockEngine, Mode, PresenceRegistry, ResourceId, ResourceUser};

use crate::config::GatewayConfig;
use crate::events::OutboundFrame;
use crate::pool::ConnectionPool;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Wraps the pure `PresenceRegistry` with the actual fan-out to connected
/// sockets. Mutations happen under the registry lock; broadcasts happen
/// after it is released, per the "never suspend while holding the
/// mutation mutex" rule.
pub struct PresenceEngine {
    registry: Mutex<PresenceRegistry>,
    pool: Arc<ConnectionPool>,
    lock_engine: Arc<LockEngine>,
    config: Arc<GatewayConfig>,
}

impl PresenceEngine {
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, lock_engine: Arc<LockEngine>, config: Arc<GatewayConfig>) -> Self {
        Self {
            registry: Mutex::new(PresenceRegistry::new()),
            pool,
            lock_engine,
            config,
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn join(
        &self,
        resource: &ResourceId,
        socket_id: &str,
        user_id: &str,
        username: &str,
        email: Option<&str>,
        mode_str: &str,
    ) -> GatewayResult<()> {
        let mode = Mode::parse(mode_str).ok_or(GatewayError::InvalidMode)?;

        let room_limit = self.config.room_limit_for(&resource.resource_type);
        {
            let registry = self.registry.lock();
            let already_in_room = registry
                .room(resource)
                .is_some_and(|room| room.users().iter().any(|u| u.socket_id == socket_id));
            let current_size = registry.room(resource).map(collab_core::Room::len).unwrap_or(0);
            if !already_in_room && current_size as u32 >= room_limit {
                return Err(GatewayError::RoomFull);
            }
        }

        let joined_at = now_ms();
        let user = ResourceUser {
            user_id: user_id.to_string(),
            username: username.to_string(),
            email: email.map(str::to_string),
            socket_id: socket_id.to_string(),
            joined_at,
            mode,
            last_activity_at: joined_at,
        };

        let (outcome, all_users_snapshot) = {
            let mut registry = self.registry.lock();
            let outcome = registry.join(resource, user);
            let snapshot = if resource.is_sub_resource() {
                Some((resource.parent(), registry.sub_resources_of(&resource.parent())))
            } else {
                None
            };
            (outcome, snapshot)
        };

        match outcome {
            JoinOutcome::AlreadyJoined(users) => {
                self.send_to(socket_id, RESOURCE_JOINED.wire_name, json!({
                    "resourceId": resource.build(),
                    "userId": user_id,
                    "success": false,
                    "joinedAt": joined_at,
                    "users": users,
                    "message": "already joined",
                }));
            }
            JoinOutcome::Joined { users } => {
                self.send_to(socket_id, RESOURCE_JOINED.wire_name, json!({
                    "resourceId": resource.build(),
                    "userId": user_id,
                    "success": true,
                    "joinedAt": joined_at,
                    "users": users,
                }));

                self.broadcast_to_room_except(resource, socket_id, USER_JOINED.wire_name, json!({
                    "resourceId": resource.build(),
                    "userId": user_id,
                    "username": username,
                    "email": email,
                    "socketId": socket_id,
                    "joinedAt": joined_at,
                    "mode": mode_str,
                }));

                if let Some((parent, subs)) = all_users_snapshot {
                    let total_count: usize = subs.iter().map(|(_, users)| users.len()).sum();
                    let sub_resources: Vec<_> = subs
                        .iter()
                        .map(|(id, users)| json!({"subResourceId": id.build(), "users": users}))
                        .collect();
                    self.send_to(socket_id, RESOURCE_ALL_USERS.wire_name, json!({
                        "parentResourceId": parent.build(),
                        "currentSubResourceId": resource.build(),
                        "subResources": sub_resources,
                        "totalCount": total_count,
                    }));
                }
            }
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn leave(&self, resource: &ResourceId, socket_id: &str, user_id: &str, username: &str, email: Option<&str>) {
        let outcome = self.registry.lock().leave(resource, socket_id);
        match outcome {
            LeaveOutcome::NotJoined => {
                self.send_to(socket_id, RESOURCE_LEFT.wire_name, json!({
                    "resourceId": resource.build(),
                    "userId": user_id,
                    "success": false,
                    "message": "not in this resource",
                }));
            }
            LeaveOutcome::Left => {
                self.send_to(socket_id, RESOURCE_LEFT.wire_name, json!({
                    "resourceId": resource.build(),
                    "userId": user_id,
                    "success": true,
                }));
                self.broadcast_to_room_except(resource, socket_id, USER_LEFT.wire_name, json!({
                    "resourceId": resource.build(),
                    "userId": user_id,
                    "username": username,
                    "email": email,
                    "reason": LeaveReason::Manual,
                }));
            }
        }
    }

    /// Sweeps every room the connection occupies and releases any lock it
    /// held. Failures on an individual room/lock are logged, never
    /// propagated — one bad room must not abort the rest of the cleanup.
    #[tracing::instrument(level = "debug", skip(self, username, user_id))]
    pub async fn on_disconnect(&self, socket_id: &str, user_id: &str, username: &str, email: Option<&str>, held_locks: &[ResourceId]) {
        let rooms_left = self.registry.lock().remove_connection(socket_id);

        for resource in &rooms_left {
            self.broadcast_to_room_except(resource, socket_id, USER_LEFT.wire_name, json!({
                "resourceId": resource.build(),
                "userId": user_id,
                "username": username,
                "email": email,
                "reason": LeaveReason::Disconnect,
            }));
        }

        let mut locks_released = 0u32;
        for resource in held_locks {
            if self.lock_engine.release(resource, user_id).await {
                locks_released += 1;
                self.broadcast_to_room_except(resource, socket_id, LOCK_RELEASED.wire_name, json!({
                    "resourceId": resource.build(),
                    "userId": user_id,
                }));
            }
        }

        info!(
            socket_id,
            rooms_left = rooms_left.len(),
            locks_released,
            "DISCONNECT_CLEANUP_COMPLETED"
        );
    }

    pub fn room_size(&self, resource: &ResourceId) -> usize {
        self.registry.lock().room(resource).map(collab_core::Room::len).unwrap_or(0)
    }

    /// Fans an arbitrary event out to every socket currently in `resource`'s
    /// room, including the caller's own socket. Used for lock notifications,
    /// which (unlike join/leave) should echo back to the acting tab too.
    pub fn broadcast_room_event(&self, resource: &ResourceId, event: &str, payload: serde_json::Value) {
        let members: Vec<String> = {
            let registry = self.registry.lock();
            registry
                .room(resource)
                .map(|room| room.users().iter().map(|u| u.socket_id.clone()).collect())
                .unwrap_or_default()
        };
        for socket_id in members {
            self.send_to(&socket_id, event, payload.clone());
        }
    }

    fn send_to(&self, socket_id: &str, event: &str, payload: serde_json::Value) {
        if let Some(conn) = self.pool.get(socket_id) {
            conn.send(OutboundFrame::new(event, payload));
        }
    }

    fn broadcast_to_room_except(&self, resource: &ResourceId, except_socket_id: &str, event: &str, payload: serde_json::Value) {
        let members: Vec<String> = {
            let registry = self.registry.lock();
            registry
                .room(resource)
                .map(|room| room.users().iter().map(|u| u.socket_id.clone()).collect())
                .unwrap_or_default()
        };
        for socket_id in members {
            if socket_id != except_socket_id {
                self.send_to(&socket_id, event, payload.clone());
            }
        }
    }
}

/// Wall-clock duration helper used by the heartbeat/reaper, kept here so
/// presence and pool share one notion of "now" in tests.
#[must_use]
pub fn stale_after(ping_timeout: Duration) -> Duration {
    ping_timeout * 2
}
