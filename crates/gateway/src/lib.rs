//! Networked transport, configuration, and binary for the collaboration
//! gateway. Pure domain logic lives in `collab-core`; this crate wires it
//! to Salvo, Redis, and a JWT-validated WebSocket handshake.

pub mod auth;
pub mod config;
pub mod events;
pub mod health;
pub mod locks;
pub mod pool;
pub mod presence;
pub mod signal;
pub mod ws;

pub use config::GatewayConfig;
pub use ws::{Gateway, InjectGateway};

use std::sync::Arc;

use salvo::cors::{AllowOrigin, Cors};
use salvo::prelude::*;

/// Builds the router this gateway serves: the WebSocket upgrade at
/// `{namespace}/socket` and plain `/healthz` / `/readyz` HTTP probes.
#[must_use]
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let socket_path = format!("{}/socket", gateway.config.namespace.trim_end_matches('/'));

    Router::new()
        .hoop(cors_hoop(&gateway.config.cors_origin))
        .hoop(InjectGateway(Arc::clone(&gateway)))
        .push(Router::with_path(socket_path).goal(ws::ws_upgrade))
        .push(Router::with_path("/healthz").get(health::healthz))
        .push(Router::with_path("/readyz").get(health::readyz))
}

/// `corsOrigin: "*"` allows any origin; anything else is taken as the one
/// exact origin permitted to open the handshake.
fn cors_hoop(cors_origin: &str) -> impl Handler {
    let allow_origin = if cors_origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        AllowOrigin::exact(cors_origin)
    };
    Cors::new().allow_origin(allow_origin).into_handler()
}
