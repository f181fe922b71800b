use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use collab_core::Principal;

use crate::events::OutboundFrame;

/// One bidirectional session. `connected_at` never changes after
/// registration; `last_activity_at` advances on every accepted inbound
/// frame and on every transport-level pong.
pub struct Connection {
    pub socket_id: String,
    pub principal: Principal,
    pub transport: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub connected_at: Instant,
    pub last_activity_at: RwLock<Instant>,
    /// Outbound channel to this connection's transport task.
    pub sender: mpsc::UnboundedSender<OutboundFrame>,
}

impl Connection {
    pub fn touch(&self) {
        *self.last_activity_at.write() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity_at.read()
    }

    /// Best-effort send; if the recipient's buffer is gone (transport
    /// already torn down) the frame is silently dropped, matching the
    /// "no unbounded queues, drop and flag stale" resource policy.
    pub fn send(&self, frame: OutboundFrame) {
        let _ = self.sender.send(frame);
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransportCounts {
    pub counts: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total: usize,
    pub unique_users: usize,
    pub by_transport: TransportCounts,
    pub stale_count: usize,
}

/// In-memory registry of live sessions, indexed by `socketId` and `userId`.
///
/// Invariants (spec §3, §8):
/// 1. `socketId ∈ byId` iff a live session exists.
/// 2. `byUser[userId]` contains exactly the sockets with that user id;
///    empty sets are removed.
/// 3. `|byUser[userId]| ≤ maxConnectionsPerUser`.
pub struct ConnectionPool {
    by_id: RwLock<HashMap<String, Arc<Connection>>>,
    by_user: RwLock<HashMap<String, HashSet<String>>>,
    max_connections_per_user: u32,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(max_connections_per_user: u32) -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
            max_connections_per_user,
        }
    }

    /// Caller must check `cap_exceeded` before calling this; registration
    /// itself is all-or-nothing and never checks caps again.
    pub fn register(&self, conn: Arc<Connection>) {
        let socket_id = conn.socket_id.clone();
        let user_id = conn.principal.user_id.clone();
        self.by_id.write().insert(socket_id.clone(), conn);
        self.by_user.write().entry(user_id).or_default().insert(socket_id);
    }

    #[must_use]
    pub fn cap_exceeded(&self, user_id: &str) -> bool {
        self.by_user
            .read()
            .get(user_id)
            .is_some_and(|sockets| sockets.len() as u32 >= self.max_connections_per_user)
    }

    #[must_use]
    pub fn get(&self, socket_id: &str) -> Option<Arc<Connection>> {
        self.by_id.read().get(socket_id).cloned()
    }

    #[must_use]
    pub fn list_by_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        let by_id = self.by_id.read();
        self.by_user
            .read()
            .get(user_id)
            .map(|sockets| sockets.iter().filter_map(|s| by_id.get(s).cloned()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.by_id.read().len()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<Connection>)) {
        for conn in self.by_id.read().values() {
            f(conn);
        }
    }

    /// Symmetric removal; purges the user's socket set once it is empty.
    pub fn remove(&self, socket_id: &str) -> Option<Arc<Connection>> {
        let removed = self.by_id.write().remove(socket_id)?;
        let user_id = removed.principal.user_id.clone();
        let mut by_user = self.by_user.write();
        if let Some(sockets) = by_user.get_mut(&user_id) {
            sockets.remove(socket_id);
            if sockets.is_empty() {
                by_user.remove(&user_id);
            }
        }
        Some(removed)
    }

    pub fn touch(&self, socket_id: &str) {
        if let Some(conn) = self.by_id.read().get(socket_id) {
            conn.touch();
        }
    }

    #[must_use]
    pub fn stats(&self, ping_timeout: Duration) -> PoolStats {
        let by_id = self.by_id.read();
        let stale_after = ping_timeout * 2;
        let now = Instant::now();
        let mut by_transport = HashMap::new();
        let mut stale_count = 0;
        for conn in by_id.values() {
            *by_transport.entry(conn.transport.clone()).or_insert(0) += 1;
            if now.duration_since(conn.last_activity()) > stale_after {
                stale_count += 1;
            }
        }
        PoolStats {
            total: by_id.len(),
            unique_users: self.by_user.read().len(),
            by_transport: TransportCounts { counts: by_transport },
            stale_count,
        }
    }

    /// Sockets whose `lastActivityAt` predates `now - 2*pingTimeout`.
    #[must_use]
    pub fn stale_sockets(&self, ping_timeout: Duration) -> Vec<String> {
        let stale_after = ping_timeout * 2;
        let now = Instant::now();
        self.by_id
            .read()
            .values()
            .filter(|conn| now.duration_since(conn.last_activity()) > stale_after)
            .map(|conn| conn.socket_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(socket_id: &str, user_id: &str) -> Arc<Connection> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Connection {
            socket_id: socket_id.to_string(),
            principal: Principal {
                user_id: user_id.to_string(),
                username: user_id.to_string(),
                email: None,
                full_name: None,
                roles: Default::default(),
            },
            transport: "websocket".to_string(),
            ip_address: "127.0.0.1".to_string(),
            user_agent: None,
            connected_at: Instant::now(),
            last_activity_at: RwLock::new(Instant::now()),
            sender: tx,
        })
    }

    #[test]
    fn register_and_lookup_round_trip() {
        let pool = ConnectionPool::new(5);
        pool.register(connection("s1", "u1"));
        assert!(pool.get("s1").is_some());
        assert_eq!(pool.list_by_user("u1").len(), 1);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn cap_is_enforced_and_released_on_disconnect() {
        let pool = ConnectionPool::new(2);
        pool.register(connection("s1", "u1"));
        assert!(!pool.cap_exceeded("u1"));
        pool.register(connection("s2", "u1"));
        assert!(pool.cap_exceeded("u1"));

        pool.remove("s1");
        assert!(!pool.cap_exceeded("u1"));
    }

    #[test]
    fn remove_purges_empty_user_set() {
        let pool = ConnectionPool::new(5);
        pool.register(connection("s1", "u1"));
        pool.remove("s1");
        assert!(pool.list_by_user("u1").is_empty());
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn stats_counts_transports() {
        let pool = ConnectionPool::new(5);
        pool.register(connection("s1", "u1"));
        pool.register(connection("s2", "u2"));
        let stats = pool.stats(Duration::from_millis(20_000));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.by_transport.counts.get("websocket"), Some(&2));
        assert_eq!(stats.stale_count, 0);
    }
}
