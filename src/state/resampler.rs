use crate::state::delta::merge_deltas;
use crate::state::Store;
use crate::stream::{Frame, Hub};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Resample every known car once at `now_ms` and broadcast one merged delta per car.
///
/// Returns the number of cars that produced a broadcast.
pub fn resample_once(store: &Store, hub: &Hub, now_ms: i64) -> usize {
    let mut broadcasts = 0;
    for car_id in store.list_car_ids() {
        let Some(merged) = merge_deltas(store.resample(car_id, now_ms)) else {
            continue;
        };
        match Frame::delta(&merged) {
            Ok(Some(frame)) => {
                hub.broadcast(car_id, frame);
                broadcasts += 1;
            }
            Ok(None) => {}
            Err(e) => error!(car_id = car_id, error = %e, "Failed to encode resampled delta"),
        }
    }
    broadcasts
}

/// Periodically re-emit the latest known values so charts stay continuous when
/// upstream goes quiet.
///
/// Runs until `shutdown` flips to `true` or its sender is dropped. A zero interval
/// disables resampling.
pub async fn run_resampler(
    store: Arc<Store>,
    hub: Arc<Hub>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if every.is_zero() {
        info!("Resampler disabled");
        return;
    }

    let mut ticker = interval(every);
    // Skip missed ticks to prevent backlog under load
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    info!(interval_ms = every.as_millis() as u64, "Resampler started");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let cars = resample_once(&store, &hub, Utc::now().timestamp_millis());
                debug!(cars = cars, "Resample tick");
            }
        }
    }
    info!("Resampler stopped");
}
