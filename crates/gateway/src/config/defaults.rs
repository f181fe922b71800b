pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_port() -> u16 {
    3001
}

pub(super) fn default_namespace() -> String {
    "/collaboration".to_string()
}

pub(super) fn default_cors_origin() -> String {
    "*".to_string()
}

pub(super) fn default_transports() -> Vec<String> {
    vec!["websocket".to_string(), "polling".to_string()]
}

pub(super) fn default_ping_interval_ms() -> u64 {
    25_000
}

pub(super) fn default_ping_timeout_ms() -> u64 {
    20_000
}

pub(super) fn default_max_connections_per_user() -> u32 {
    5
}

pub(super) fn default_room_limit() -> u32 {
    50
}

pub(super) fn default_lock_ttl_ms() -> u64 {
    300_000
}

pub(super) fn default_lock_heartbeat_interval_ms() -> u64 {
    60_000
}

pub(super) fn default_lock_sweep_interval_ms() -> u64 {
    60_000
}

pub(super) fn default_sweep_interval_ms() -> u64 {
    60_000
}

pub(super) fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

pub(super) fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

pub(super) fn default_rate_limit() -> usize {
    20
}

pub(super) fn default_rate_limit_window_ms() -> u64 {
    1_000
}

pub(super) fn default_jwt_format() -> String {
    "HMAC".to_string()
}

pub(super) fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}
