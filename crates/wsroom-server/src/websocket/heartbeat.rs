//! Ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::Connection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No pong arrived within the pong wait.
    TimedOut,
    /// The outbound queue is closed or the connection is closing.
    ProbeFailed,
    /// The connection was torn down elsewhere.
    Cancelled,
}

/// Probe `connection` every `ping_period` until it stops answering.
///
/// The connection is dead once more than `pong_wait` has passed since the
/// last pong (or since it opened). The first probe goes out one period after
/// the loop starts.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    ping_period: Duration,
    pong_wait: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(time::Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                let silent_for = connection.last_pong_elapsed();
                if silent_for > pong_wait {
                    debug!(connection_id = %connection.id(), ?silent_for, "pong deadline passed");
                    return HeartbeatResult::TimedOut;
                }
                match connection.probe() {
                    Ok(true) => {}
                    Ok(false) => debug!(connection_id = %connection.id(), "outbound queue full, probe skipped"),
                    Err(_) => return HeartbeatResult::ProbeFailed,
                }
            }
        }
    }
}
