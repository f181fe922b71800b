use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use collab_core::{InMemoryLockStore, LockEngine, Principal, ResourceId};
use collab_gateway::config::{GatewayConfig, JwtConfig};
use collab_gateway::locks::RedisLockStore;
use collab_gateway::Gateway;

fn config() -> Arc<GatewayConfig> {
    Arc::new(GatewayConfig {
        enabled: true,
        port: 3001,
        namespace: "/collaboration".into(),
        cors_origin: "*".into(),
        transports: vec!["websocket".into()],
        ping_interval_ms: 25_000,
        ping_timeout_ms: 20_000,
        max_connections_per_user: 5,
        room_limits: HashMap::new(),
        default_room_limit: 50,
        lock_ttl_ms: 300_000,
        lock_heartbeat_interval_ms: 60_000,
        lock_sweep_interval_ms: 60_000,
        sweep_interval_ms: 60_000,
        shutdown_timeout_ms: 5_000,
        redis_url: "redis://127.0.0.1:6379".into(),
        rate_limit_per_window: 20,
        rate_limit_window_ms: 1_000,
        jwt: JwtConfig {
            secret: "test-secret".into(),
            format: "HMAC".into(),
            algorithm: "HS256".into(),
            issuer: None,
            audience: None,
        },
    })
}

fn gateway() -> Arc<Gateway> {
    let store = Arc::new(InMemoryLockStore::new());
    let lock_engine = Arc::new(LockEngine::new(store, Duration::from_millis(300_000)));
    Gateway::new(config(), lock_engine)
}

fn principal(user_id: &str) -> Principal {
    Principal {
        user_id: user_id.to_string(),
        username: format!("user-{user_id}"),
        email: None,
        full_name: None,
        roles: Default::default(),
    }
}

fn register(gateway: &Arc<Gateway>, user_id: &str) -> String {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    gateway
        .register(principal(user_id), "websocket", "127.0.0.1", None, tx)
        .expect("registration should succeed")
}

#[tokio::test]
async fn two_tabs_joining_the_same_sub_resource_see_each_other() {
    let gateway = gateway();
    let s1 = register(&gateway, "alice");
    let s2 = register(&gateway, "bob");

    let resource = ResourceId::parse("doc:42/tab:A").unwrap();
    gateway.presence.join(&resource, &s1, "alice", "alice", None, "edit").unwrap();
    gateway.presence.join(&resource, &s2, "bob", "bob", None, "view").unwrap();

    assert_eq!(gateway.presence.room_size(&resource), 2);
}

#[tokio::test]
async fn sixth_connection_for_the_same_user_is_rejected() {
    let gateway = gateway();
    for _ in 0..5 {
        register(&gateway, "alice");
    }
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let result = gateway.register(principal("alice"), "websocket", "127.0.0.1", None, tx);
    assert!(matches!(result, Err(collab_core::GatewayError::MaxConnectionsExceeded)));
}

#[tokio::test]
async fn joining_a_full_room_is_rejected() {
    let mut cfg = (*config()).clone();
    cfg.room_limits.insert("surgery".into(), 1);
    let store = Arc::new(InMemoryLockStore::new());
    let lock_engine = Arc::new(LockEngine::new(store, Duration::from_millis(300_000)));
    let gateway = Gateway::new(Arc::new(cfg), lock_engine);

    let s1 = register(&gateway, "alice");
    let s2 = register(&gateway, "bob");
    let resource = ResourceId::root("surgery", "1");

    gateway.presence.join(&resource, &s1, "alice", "alice", None, "edit").unwrap();
    let err = gateway.presence.join(&resource, &s2, "bob", "bob", None, "view").unwrap_err();
    assert!(matches!(err, collab_core::GatewayError::RoomFull));
}

#[tokio::test]
async fn acquiring_a_lock_then_disconnecting_releases_it() {
    let gateway = gateway();
    let s1 = register(&gateway, "alice");
    let resource = ResourceId::root("surgery", "1");

    assert!(gateway.lock_engine.acquire(&resource, "alice", None).await);
    gateway.record_lock_held(&s1, resource.clone());

    gateway.force_disconnect(&s1).await;

    assert!(gateway.lock_engine.get_holder(&resource).await.is_none());
}

#[tokio::test]
async fn disconnect_releases_every_held_lock_and_leaves_every_room() {
    let gateway = gateway();
    let s1 = register(&gateway, "alice");

    let r1 = ResourceId::root("surgery", "1");
    let r2 = ResourceId::root("surgery", "2");
    gateway.presence.join(&r1, &s1, "alice", "alice", None, "edit").unwrap();
    gateway.presence.join(&r2, &s1, "alice", "alice", None, "edit").unwrap();
    assert!(gateway.lock_engine.acquire(&r1, "alice", None).await);
    assert!(gateway.lock_engine.acquire(&r2, "alice", None).await);
    gateway.record_lock_held(&s1, r1.clone());
    gateway.record_lock_held(&s1, r2.clone());

    gateway.force_disconnect(&s1).await;

    assert!(gateway.lock_engine.get_holder(&r1).await.is_none());
    assert!(gateway.lock_engine.get_holder(&r2).await.is_none());
    assert_eq!(gateway.presence.room_size(&r1), 0);
    assert_eq!(gateway.presence.room_size(&r2), 0);
}

#[tokio::test]
async fn lock_released_by_another_user_is_rejected() {
    let gateway = gateway();
    let resource = ResourceId::root("surgery", "1");
    assert!(gateway.lock_engine.acquire(&resource, "alice", None).await);
    assert!(!gateway.lock_engine.release(&resource, "bob").await);
    assert!(gateway.lock_engine.get_holder(&resource).await.is_some());
}

#[tokio::test]
async fn lock_auto_releases_after_ttl_expiry() {
    let store = Arc::new(InMemoryLockStore::new());
    let lock_engine = Arc::new(LockEngine::new(store, Duration::from_millis(50)));
    let gateway = Gateway::new(config(), lock_engine);
    let resource = ResourceId::root("surgery", "1");

    assert!(gateway.lock_engine.acquire(&resource, "alice", None).await);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(gateway.lock_engine.get_holder(&resource).await.is_none());
    assert!(gateway.lock_engine.acquire(&resource, "bob", None).await);
}

/// Exercises the real Redis-backed store instead of the in-memory one.
/// Needs a live server; run with `cargo test -- --ignored` against
/// `redis://127.0.0.1:6379` (or set `GATEWAY_TEST_REDIS_URL`).
#[tokio::test]
#[ignore]
async fn redis_backed_lock_store_resolves_an_acquire_race() {
    let redis_url = std::env::var("GATEWAY_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let store = Arc::new(RedisLockStore::new(&redis_url).expect("redis pool"));
    let lock_engine = Arc::new(LockEngine::new(store, Duration::from_millis(5_000)));
    let gateway = Gateway::new(config(), lock_engine);

    let resource = ResourceId::root("doc", format!("redis-test-{}", std::process::id()).as_str());
    assert!(gateway.lock_engine.acquire(&resource, "alice", None).await);
    assert!(!gateway.lock_engine.acquire(&resource, "bob", None).await);
    assert!(gateway.lock_engine.release(&resource, "alice").await);
    assert!(gateway.lock_engine.get_holder(&resource).await.is_none());
}
