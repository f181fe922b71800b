use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::ws::Gateway;

/// OS-signal-triggered shutdown always uses this grace period rather than
/// the configured `shutdownTimeout`, which is meant for longer-running
/// programmatic shutdowns; a process already being killed by its
/// supervisor should not hold the grace period open for the full default.
const SIGNAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Waits for a termination signal and runs graceful shutdown with a fixed
/// 3s grace period. If a second signal arrives while that period is still
/// running, shutdown is forced immediately instead of waiting it out.
#[cfg(unix)]
pub async fn wait_and_shutdown(gateway: Arc<Gateway>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("SIGQUIT handler");

    let sig = tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    warn!(signal = sig, "received shutdown signal");

    let graceful = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move { gateway.shutdown(SIGNAL_SHUTDOWN_TIMEOUT).await }
    });

    tokio::select! {
        _ = graceful => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("received second shutdown signal, forcing override");
            gateway.force_shutdown_now().await;
        }
        _ = term.recv() => {
            warn!("received second shutdown signal, forcing override");
            gateway.force_shutdown_now().await;
        }
        _ = quit.recv() => {
            warn!("received second shutdown signal, forcing override");
            gateway.force_shutdown_now().await;
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_and_shutdown(gateway: Arc<Gateway>) {
    let _ = tokio::signal::ctrl_c().await;
    warn!("received Ctrl+C");
    gateway.shutdown(SIGNAL_SHUTDOWN_TIMEOUT).await;
}
