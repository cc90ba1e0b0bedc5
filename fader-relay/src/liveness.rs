//! Liveness supervisor: periodic probe-and-evict over all connections.
//!
//! Runs as its own task on a fixed interval, coordinating with the
//! connection tasks only through the shared [`Relay`]. Each cycle evicts
//! every connection whose previous probe went unanswered and probes the
//! rest, so a truly dead peer is gone within two cycles. Message
//! handling never participates: a connection spewing garbage frames is
//! still alive, and a silent one is still dead.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::time::{interval, MissedTickBehavior};

use crate::relay::Relay;

/// Drive the probe cycle forever. Spawned by the server; callers wanting
/// finer control can invoke [`Relay::sweep`] on their own schedule.
pub async fn run(relay: Arc<Relay>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so sweeps start one
    // full period after boot.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = relay.sweep().await;
        if !evicted.is_empty() {
            info!("evicted {} unresponsive connection(s)", evicted.len());
        }
    }
}
