use std::sync::Arc;

use salvo::prelude::*;
use salvo::websocket::{Message, WebSocketUpgrade};
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::validate_token;
use crate::ws::Gateway;

use super::session;

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    token: Option<String>,
}

/// Upgrade entrypoint mounted at `{namespace}/socket`.
///
/// Auth happens here, before the upgrade completes: an invalid or missing
/// bearer token gets a plain `401` and the socket never opens. This is the
/// opposite of validating after `on_upgrade`, which would mean the client
/// already holds a live connection by the time it learns it is unauthorized.
#[handler]
pub async fn ws_upgrade(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<(), StatusError> {
    let gateway = depot
        .obtain::<Arc<Gateway>>()
        .map(Arc::clone)
        .map_err(|_| StatusError::internal_server_error())?;

    if !gateway.config.enabled {
        warn!("websocket handshake rejected: gateway disabled");
        return Err(StatusError::service_unavailable());
    }

    let query: HandshakeQuery = req.extract().await.unwrap_or(HandshakeQuery { token: None });
    let token = query.token.or_else(|| bearer_from_header(req)).unwrap_or_default();

    let principal = match validate_token(&gateway.config.jwt, &token) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "websocket handshake rejected");
            return Err(StatusError::unauthorized());
        }
    };

    let transport = "websocket".to_string();
    let ip_address = req
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = req
        .header::<String>("user-agent")
        .map(|h| h.to_string());

    WebSocketUpgrade::new()
        .upgrade(req, res, move |ws| async move {
            let (sink, stream) = futures_util::StreamExt::split(ws);
            session::run(gateway, principal, transport, ip_address, user_agent, sink, stream).await;
        })
        .await
}

fn bearer_from_header(req: &Request) -> Option<String> {
    let header = req.header::<String>("authorization")?;
    header.strip_prefix("Bearer ").map(str::to_string)
}

pub(crate) fn is_close(msg: &Message) -> bool {
    msg.is_close()
}

pub(crate) fn log_session_start(socket_id: &str, user_id: &str) {
    info!(socket_id, user_id, "websocket session started");
}
