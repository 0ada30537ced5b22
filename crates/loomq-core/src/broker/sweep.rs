use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::broker::Broker;

/// Periodically re-queue messages whose worker missed the pending timeout.
///
/// One sweeper serves every topic. It stops on shutdown or once the broker
/// has been dropped. A failing topic is logged and skipped on each pass.
pub(crate) async fn run_sweeper(
    broker: Weak<Broker>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "recovery sweep started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if !*shutdown.borrow_and_update() {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let Some(broker) = broker.upgrade() else {
                        break;
                    };
                    let reclaimed = broker.sweep_once().await;
                    if reclaimed > 0 {
                        debug!(reclaimed, "sweep pass complete");
                    }
                }
            }
        }
    }

    info!("recovery sweep stopped");
}
