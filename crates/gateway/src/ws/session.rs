use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, Stream, StreamExt};
use salvo::websocket::Message;
use serde::Deserialize;
use tracing::{debug, warn};

use collab_core::events::{LOCK_ACQUIRED, LOCK_RELEASED, LOCK_STOLEN};
use collab_core::{AcquireOutcome, GatewayError, GatewayResult, Principal, ResourceId};

use super::Gateway;
use crate::events::OutboundFrame;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
struct ResourcePayload {
    #[serde(rename = "resourceId")]
    resource_id: String,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "view".to_string()
}

#[derive(Debug, Deserialize)]
struct LockPayload {
    #[serde(rename = "resourceId")]
    resource_id: String,
    #[serde(default, rename = "ttlMs")]
    ttl_ms: Option<u64>,
}

/// Drives one accepted connection end to end: registers it, pumps the
/// outbound channel to the socket sink, reads and dispatches inbound
/// frames, and runs cleanup once either side closes.
///
/// The outbound pump and the inbound read loop run as two halves of the
/// same select loop rather than two tasks, so there is exactly one place
/// that owns the socket's sink and this function's return is the single
/// point where `force_disconnect` is guaranteed to run.
pub async fn run<S>(
    gateway: Arc<Gateway>,
    principal: Principal,
    transport: String,
    ip_address: String,
    user_agent: Option<String>,
    mut sink: futures_util::stream::SplitSink<S, Message>,
    mut stream: futures_util::stream::SplitStream<S>,
) where
    S: Stream<Item = Result<Message, salvo::Error>> + Send,
{
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OutboundFrame>();

    let socket_id = match gateway.register(principal.clone(), &transport, &ip_address, user_agent, tx) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, user_id = %principal.user_id, "registration rejected at handshake");
            let frame = OutboundFrame::new(
                "CONNECT_ERROR",
                serde_json::json!({"code": e.code(), "type": e.type_name(), "message": e.public_message()}),
            );
            let _ = sink.send(Message::text(frame.to_wire_json().to_string())).await;
            let _ = sink.close().await;
            return;
        }
    };

    super::handler::log_session_start(&socket_id, &principal.user_id);

    let mut ping_ticker = tokio::time::interval(gateway.config.ping_interval());

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(frame) = outbound else { break };
                if sink.send(Message::text(frame.to_wire_json().to_string())).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(msg)) if super::handler::is_close(&msg) => break,
                    Some(Ok(msg)) => {
                        if msg.is_ping() {
                            let _ = sink.send(Message::pong(msg.as_bytes().to_vec())).await;
                            continue;
                        }
                        if msg.is_pong() {
                            gateway.pool.touch(&socket_id);
                            continue;
                        }
                        if let Ok(text) = msg.to_str() {
                            gateway.pool.touch(&socket_id);
                            handle_inbound(&gateway, &socket_id, &principal, text).await;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(socket_id = %socket_id, error = %e, "websocket read error");
                        break;
                    }
                    None => break,
                }
            }
            _ = ping_ticker.tick() => {
                if sink.send(Message::ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    gateway.force_disconnect(&socket_id).await;
}

async fn handle_inbound(gateway: &Arc<Gateway>, socket_id: &str, principal: &Principal, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => {
            send_error(gateway, socket_id, &GatewayError::InvalidPayload);
            return;
        }
    };

    if !gateway.rate_limiter.allow(&socket_id.to_string()).await {
        gateway.metrics.rate_limit_denials.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        send_error(gateway, socket_id, &GatewayError::RateLimitExceeded);
        return;
    }

    let result = dispatch(gateway, socket_id, principal, &frame.event, frame.payload).await;
    if let Err(e) = result {
        send_error(gateway, socket_id, &e);
    }
}

async fn dispatch(
    gateway: &Arc<Gateway>,
    socket_id: &str,
    principal: &Principal,
    event: &str,
    payload: serde_json::Value,
) -> GatewayResult<()> {
    match event {
        "resource:join" => {
            let p: ResourcePayload = serde_json::from_value(payload).map_err(|_| GatewayError::InvalidPayload)?;
            let resource = ResourceId::parse(&p.resource_id)?;
            gateway.presence.join(
                &resource,
                socket_id,
                &principal.user_id,
                &principal.username,
                principal.email.as_deref(),
                &p.mode,
            )
        }
        "resource:leave" => {
            let p: ResourcePayload = serde_json::from_value(payload).map_err(|_| GatewayError::InvalidPayload)?;
            let resource = ResourceId::parse(&p.resource_id)?;
            gateway.presence.leave(&resource, socket_id, &principal.user_id, &principal.username, principal.email.as_deref());
            Ok(())
        }
        "lock:acquire" => {
            let p: LockPayload = serde_json::from_value(payload).map_err(|_| GatewayError::InvalidPayload)?;
            let resource = ResourceId::parse(&p.resource_id)?;
            let ttl = p.ttl_ms.map(std::time::Duration::from_millis);
            let outcome = gateway.lock_engine.acquire_outcome(&resource, &principal.user_id, ttl).await;
            match outcome {
                AcquireOutcome::Acquired => {
                    gateway.record_lock_held(socket_id, resource.clone());
                    broadcast_lock_event(gateway, &resource, LOCK_ACQUIRED.wire_name, &principal.user_id);
                    Ok(())
                }
                AcquireOutcome::Stolen { previous_owner } => {
                    gateway.record_lock_held(socket_id, resource.clone());
                    broadcast_stolen_lock_event(gateway, &resource, &principal.user_id, &previous_owner);
                    Ok(())
                }
                AcquireOutcome::Conflict => Err(GatewayError::LockConflict),
            }
        }
        "lock:release" => {
            let p: LockPayload = serde_json::from_value(payload).map_err(|_| GatewayError::InvalidPayload)?;
            let resource = ResourceId::parse(&p.resource_id)?;
            let ok = gateway.lock_engine.release(&resource, &principal.user_id).await;
            if ok {
                gateway.forget_lock_held(socket_id, &resource);
                broadcast_lock_event(gateway, &resource, LOCK_RELEASED.wire_name, &principal.user_id);
                Ok(())
            } else {
                Err(GatewayError::LockNotOwned)
            }
        }
        "lock:renew" => {
            let p: LockPayload = serde_json::from_value(payload).map_err(|_| GatewayError::InvalidPayload)?;
            let resource = ResourceId::parse(&p.resource_id)?;
            let ttl = p.ttl_ms.map(std::time::Duration::from_millis).unwrap_or(gateway.config.lock_ttl());
            if gateway.lock_engine.renew(&resource, &principal.user_id, ttl).await {
                Ok(())
            } else {
                Err(GatewayError::LockExtendFailed)
            }
        }
        _ => Err(GatewayError::InvalidPayload),
    }
}

fn broadcast_lock_event(gateway: &Arc<Gateway>, resource: &ResourceId, event: &str, user_id: &str) {
    gateway.presence.broadcast_room_event(
        resource,
        event,
        serde_json::json!({"resourceId": resource.build(), "userId": user_id}),
    );
}

fn broadcast_stolen_lock_event(gateway: &Arc<Gateway>, resource: &ResourceId, user_id: &str, previous_owner: &str) {
    gateway.presence.broadcast_room_event(
        resource,
        LOCK_STOLEN.wire_name,
        serde_json::json!({
            "resourceId": resource.build(),
            "userId": user_id,
            "previousUserId": previous_owner,
        }),
    );
}

fn send_error(gateway: &Arc<Gateway>, socket_id: &str, err: &GatewayError) {
    if let Some(conn) = gateway.pool.get(socket_id) {
        let frame = collab_core::ErrorFrame::new(err, now_ms());
        conn.send(OutboundFrame::new("error", frame));
    }
}
