mod handler;
mod session;

pub use handler::ws_upgrade;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use salvo::{Depot, FlowCtrl, Handler, Request, Response};
use tracing::{info, warn};

use collab_core::{GatewayError, GatewayResult, LockEngine, Principal, RateLimitConfig, RateLimiter, ResourceId};

use crate::config::GatewayConfig;
use crate::events::OutboundFrame;
use crate::pool::{Connection, ConnectionPool};
use crate::presence::PresenceEngine;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub rate_limit_denials: AtomicU64,
}

/// Tracks which resources each socket currently holds a lock on, so
/// disconnect cleanup knows what to release without scanning the whole
/// lock store. Purely a local hint: the store remains the source of truth.
pub struct HeldLocks {
    by_socket: DashMap<String, Vec<ResourceId>>,
}

impl HeldLocks {
    fn new() -> Self {
        Self { by_socket: DashMap::new() }
    }

    fn record(&self, socket_id: &str, resource: ResourceId) {
        let mut entry = self.by_socket.entry(socket_id.to_string()).or_default();
        if !entry.contains(&resource) {
            entry.push(resource);
        }
    }

    fn forget(&self, socket_id: &str, resource: &ResourceId) {
        if let Some(mut entry) = self.by_socket.get_mut(socket_id) {
            entry.retain(|r| r != resource);
        }
    }

    fn take(&self, socket_id: &str) -> Vec<ResourceId> {
        self.by_socket.remove(socket_id).map(|(_, v)| v).unwrap_or_default()
    }
}

/// Top-level orchestrator: authenticated session lifecycle, connection
/// pool, heartbeat, stale reaper, and graceful shutdown (spec §4.G).
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub pool: Arc<ConnectionPool>,
    pub presence: Arc<PresenceEngine>,
    pub lock_engine: Arc<LockEngine>,
    pub rate_limiter: Arc<RateLimiter<String>>,
    pub held_locks: Arc<HeldLocks>,
    pub metrics: Arc<GatewayMetrics>,
    shutting_down: AtomicBool,
}

impl Gateway {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, lock_engine: Arc<LockEngine>) -> Arc<Self> {
        let pool = Arc::new(ConnectionPool::new(config.max_connections_per_user));
        let presence = Arc::new(PresenceEngine::new(pool.clone(), lock_engine.clone(), config.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(
            config.rate_limit_per_window,
            Duration::from_millis(config.rate_limit_window_ms),
        )));
        Arc::new(Self {
            config,
            pool,
            presence,
            lock_engine,
            rate_limiter,
            held_locks: Arc::new(HeldLocks::new()),
            metrics: Arc::new(GatewayMetrics::default()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Registers a connection after handshake-time auth has already
    /// succeeded. Checks the per-user cap; registration itself is
    /// all-or-nothing. Returns the new connection's socket id.
    pub fn register(
        self: &Arc<Self>,
        principal: Principal,
        transport: &str,
        ip_address: &str,
        user_agent: Option<String>,
        sender: tokio::sync::mpsc::UnboundedSender<OutboundFrame>,
    ) -> GatewayResult<String> {
        if self.pool.cap_exceeded(&principal.user_id) {
            self.metrics.connections_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(GatewayError::MaxConnectionsExceeded);
        }

        let socket_id = uuid::Uuid::new_v4().to_string();
        let now = std::time::Instant::now();
        let connection = Arc::new(Connection {
            socket_id: socket_id.clone(),
            principal: principal.clone(),
            transport: transport.to_string(),
            ip_address: ip_address.to_string(),
            user_agent,
            connected_at: now,
            last_activity_at: parking_lot::RwLock::new(now),
            sender,
        });
        self.pool.register(connection);
        self.metrics.connections_accepted.fetch_add(1, Ordering::Relaxed);

        if let Some(conn) = self.pool.get(&socket_id) {
            conn.send(OutboundFrame::new(
                "CONNECTED",
                serde_json::json!({
                    "socketId": socket_id,
                    "userId": principal.user_id,
                    "timestamp": now_ms(),
                }),
            ));
        }

        info!(socket_id = %socket_id, user_id = %principal.user_id, "connection registered");
        Ok(socket_id)
    }

    /// Removes from the pool whether or not the transport-level disconnect
    /// has already completed, runs presence cleanup, and releases any
    /// locks the socket held.
    pub async fn force_disconnect(self: &Arc<Self>, socket_id: &str) {
        let Some(conn) = self.pool.remove(socket_id) else {
            return;
        };
        self.rate_limiter.forget(&socket_id.to_string());
        let held = self.held_locks.take(socket_id);
        self.presence
            .on_disconnect(socket_id, &conn.principal.user_id, &conn.principal.username, conn.principal.email.as_deref(), &held)
            .await;
    }

    /// Force-disconnects every session belonging to `user_id`.
    pub async fn disconnect_user(self: &Arc<Self>, user_id: &str) {
        let sockets: Vec<String> = self.pool.list_by_user(user_id).iter().map(|c| c.socket_id.clone()).collect();
        for socket_id in sockets {
            self.force_disconnect(&socket_id).await;
        }
    }

    /// Broadcasts `SERVER_SHUTDOWN` to every connection, waits up to
    /// `timeout`, then force-disconnects whatever remains. Idempotent.
    pub async fn shutdown(self: &Arc<Self>, timeout: Duration) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("starting graceful shutdown");

        let frame = OutboundFrame::new(
            "SERVER_SHUTDOWN",
            serde_json::json!({
                "message": "Server is shutting down",
                "timestamp": now_ms(),
            }),
        );
        self.pool.for_each(|conn| conn.send(frame.clone()));

        tokio::time::sleep(timeout).await;

        let remaining: Vec<String> = {
            let mut ids = Vec::new();
            self.pool.for_each(|conn| ids.push(conn.socket_id.clone()));
            ids
        };
        for socket_id in remaining {
            self.force_disconnect(&socket_id).await;
        }
        info!("graceful shutdown complete");
    }

    /// Disconnects every remaining connection immediately, bypassing the
    /// grace period. Safe to call at any time, including after `shutdown`
    /// has already run: disconnecting an already-removed socket is a no-op.
    pub async fn force_shutdown_now(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let remaining: Vec<String> = {
            let mut ids = Vec::new();
            self.pool.for_each(|conn| ids.push(conn.socket_id.clone()));
            ids
        };
        for socket_id in remaining {
            self.force_disconnect(&socket_id).await;
        }
        info!("forced shutdown complete");
    }

    /// Periodic scan forcing disconnect of any session stale by
    /// `2 * ping_timeout`. Runs until the gateway starts shutting down.
    pub fn spawn_stale_reaper(self: &Arc<Self>) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gateway.config.sweep_interval());
            loop {
                ticker.tick().await;
                if gateway.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let stale = gateway.pool.stale_sockets(gateway.config.ping_timeout());
                for socket_id in stale {
                    warn!(socket_id, "reaping stale connection");
                    gateway.force_disconnect(&socket_id).await;
                }
            }
        });
    }

    pub fn record_lock_held(&self, socket_id: &str, resource: ResourceId) {
        self.held_locks.record(socket_id, resource);
    }

    pub fn forget_lock_held(&self, socket_id: &str, resource: &ResourceId) {
        self.held_locks.forget(socket_id, resource);
    }
}

/// Hoop that makes the `Gateway` available to handlers via `Depot::obtain`.
pub struct InjectGateway(pub Arc<Gateway>);

#[async_trait]
impl Handler for InjectGateway {
    async fn handle(&self, _req: &mut Request, depot: &mut Depot, _res: &mut Response, _ctrl: &mut FlowCtrl) {
        depot.inject(Arc::clone(&self.0));
    }
}
