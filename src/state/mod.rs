// Car state, windowed history, and delta encoding

mod delta;
mod model;
mod resampler;
mod store;

pub use delta::{merge_deltas, Delta, SnapshotPayload};
pub use model::{
    Battery, Breadcrumb, CarState, Climate, Coordinates, HistoryWindow, Location, MetadataField,
    Metric, Route, Sample, TirePosition, TirePressures,
};
pub use resampler::{resample_once, run_resampler};
pub use store::{CarSummary, Store};

#[cfg(test)]
mod tests;
