// Upstream telemetry ingestion: topic routing, store updates, and broadcast

mod mqtt;
mod topic;

pub use mqtt::{broker_address, run_mqtt_ingest, subscription_filters};
pub use topic::{parse_leaf, parse_message, split_topic, TelemetryUpdate, TopicError};

use crate::state::{Delta, Store};
use crate::stream::{Frame, Hub};
use std::sync::Arc;
use tracing::error;


/// Applies normalized updates to the store and fans the resulting deltas out
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<Store>,
    hub: Arc<Hub>,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, hub: Arc<Hub>) -> Self {
        Self { store, hub }
    }

    /// Apply one update stamped `ts_ms`.
    ///
    /// Returns the number of subscribers the delta reached. Metadata updates are
    /// stored silently and never broadcast.
    pub fn apply(&self, car_id: i64, ts_ms: i64, update: TelemetryUpdate) -> usize {
        let delta = match update {
            TelemetryUpdate::Location { lat, lon } => {
                let store = &self.store;
                store.apply_location(car_id, ts_ms, lat, lon, None, None, None)
            }
            TelemetryUpdate::Metric { metric, value } => {
                self.store.apply_metric(car_id, ts_ms, metric, value)
            }
            TelemetryUpdate::Route(route) => self.store.apply_route(car_id, ts_ms, route),
            TelemetryUpdate::Metadata { field, value } => {
                self.store.set_metadata_silently(car_id, ts_ms, field, value);
                return 0;
            }
        };
        self.publish(car_id, &delta)
    }

    /// Route a raw transport message and apply it.
    ///
    /// A malformed message is rejected on its own; nothing is stored for it.
    pub fn handle_message(
        &self,
        topic_prefix: &str,
        topic: &str,
        payload: &[u8],
        ts_ms: i64,
    ) -> Result<usize, TopicError> {
        let payload = std::str::from_utf8(payload).map_err(|_| TopicError::InvalidPayload {
            leaf: topic.rsplit('/').next().unwrap_or_default().to_string(),
            reason: "payload is not UTF-8".to_string(),
        })?;
        let (car_id, update) = parse_message(topic_prefix, topic, payload)?;
        Ok(self.apply(car_id, ts_ms, update))
    }

    fn publish(&self, car_id: i64, delta: &Delta) -> usize {
        match Frame::delta(delta) {
            Ok(Some(frame)) => self.hub.broadcast(car_id, frame),
            Ok(None) => 0,
            Err(e) => {
                error!(car_id = car_id, error = %e, "Failed to encode delta");
                0
            }
        }
    }
}
