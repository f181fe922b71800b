mod defaults;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use collab_core::GatewayError;

use defaults::*;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_jwt_format")]
    pub format: String,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    #[serde(default = "default_transports")]
    pub transports: Vec<String>,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: u32,
    #[serde(default)]
    pub room_limits: HashMap<String, u32>,
    #[serde(default = "default_room_limit")]
    pub default_room_limit: u32,
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    #[serde(default = "default_lock_heartbeat_interval_ms")]
    pub lock_heartbeat_interval_ms: u64,
    #[serde(default = "default_lock_sweep_interval_ms")]
    pub lock_sweep_interval_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_window: usize,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    pub jwt: JwtConfig,
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GATEWAY_").split("__"));
        let config: Self = figment
            .extract()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn room_limit_for(&self, resource_type: &str) -> u32 {
        self.room_limits
            .get(resource_type)
            .copied()
            .unwrap_or(self.default_room_limit)
    }

    /// Validates every field enumerated in the configuration surface and
    /// aggregates *all* problems into a single error, rather than failing
    /// on the first one — startup should report the complete list in one
    /// shot so an operator doesn't have to fix-and-restart repeatedly.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut problems = Vec::new();

        if self.port == 0 {
            problems.push("port must be between 1 and 65535".to_string());
        }
        if !self.namespace.starts_with('/') {
            problems.push(format!("namespace must start with '/', got {:?}", self.namespace));
        }
        if self.transports.is_empty() {
            problems.push("transports must list at least one transport".to_string());
        }
        if self.ping_timeout_ms >= self.ping_interval_ms {
            problems.push(format!(
                "pingTimeout ({} ms) must be less than pingInterval ({} ms)",
                self.ping_timeout_ms, self.ping_interval_ms
            ));
        }
        if self.max_connections_per_user < 1 {
            problems.push("maxConnectionsPerUser must be at least 1".to_string());
        }
        if self.jwt.secret.trim().is_empty() {
            problems.push("jwt.secret must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Config(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> GatewayConfig {
        GatewayConfig {
            enabled: true,
            port: 3001,
            namespace: "/collaboration".into(),
            cors_origin: "*".into(),
            transports: vec!["websocket".into(), "polling".into()],
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
            redis_url: "redis://localhost:6379".into(),
            rate_limit_per_window: 20,
            rate_limit_window_ms: 1_000,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                format: "HMAC".into(),
                algorithm: "HS256".into(),
                issuer: None,
                audience: None,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn aggregates_every_problem_into_one_error() {
        let mut cfg = base();
        cfg.port = 0;
        cfg.namespace = "collaboration".into();
        cfg.ping_timeout_ms = cfg.ping_interval_ms;
        cfg.transports.clear();

        let err = cfg.validate().unwrap_err();
        let GatewayError::Config(msg) = err else {
            panic!("expected Config error");
        };
        assert!(msg.contains("port"));
        assert!(msg.contains("namespace"));
        assert!(msg.contains("pingTimeout"));
        assert!(msg.contains("transports"));
    }

    #[test]
    fn room_limit_falls_back_to_default() {
        let mut cfg = base();
        cfg.room_limits.insert("doc".into(), 10);
        assert_eq!(cfg.room_limit_for("doc"), 10);
        assert_eq!(cfg.room_limit_for("whiteboard"), 50);
    }
}
