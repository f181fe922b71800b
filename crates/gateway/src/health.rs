use std::sync::Arc;
use std::sync::atomic::Ordering;

use salvo::prelude::*;
use serde::Serialize;

use crate::ws::Gateway;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// Liveness probe: the process is up and accepting requests. Never checks
/// downstream dependencies, so an outage there doesn't flap this check.
#[handler]
pub async fn healthz(res: &mut Response) {
    res.render(Json(HealthBody { status: "ok" }));
}

#[derive(Serialize)]
struct ReadinessBody {
    status: &'static str,
    connections: usize,
    unique_users: usize,
    connections_accepted: u64,
    connections_rejected: u64,
    rate_limit_denials: u64,
}

/// Readiness probe: reports current pool occupancy and counters so an
/// orchestrator (or an operator curling this by hand) can see load at a
/// glance without reaching for the metrics endpoint.
#[handler]
pub async fn readyz(depot: &mut Depot, res: &mut Response) -> Result<(), StatusError> {
    let gateway = depot
        .obtain::<Arc<Gateway>>()
        .map_err(|_| StatusError::internal_server_error())?;

    let stats = gateway.pool.stats(gateway.config.ping_timeout());
    res.render(Json(ReadinessBody {
        status: "ready",
        connections: stats.total,
        unique_users: stats.unique_users,
        connections_accepted: gateway.metrics.connections_accepted.load(Ordering::Relaxed),
        connections_rejected: gateway.metrics.connections_rejected.load(Ordering::Relaxed),
        rate_limit_denials: gateway.metrics.rate_limit_denials.load(Ordering::Relaxed),
    }));
    Ok(())
}
