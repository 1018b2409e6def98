use crate::state::model::{
    Battery, Breadcrumb, CarState, Climate, HistoryWindow, Location, Metric, Route, Sample,
    TirePressures,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Partial state produced by one mutation.
///
/// Carries the mutation timestamp plus only the sections and history series the
/// mutation touched. Serializes to the same shape as [`SnapshotPayload`] with every
/// absent section omitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Delta {
    pub ts_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<Battery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub climate: Option<Climate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpms_bar: Option<TirePressures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(rename = "history_30s", skip_serializing_if = "BTreeMap::is_empty")]
    pub history: BTreeMap<Metric, Vec<Sample>>,
    #[serde(rename = "path_30s", skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Breadcrumb>>,
}

impl Delta {
    pub fn new(ts_ms: i64) -> Self {
        Self {
            ts_ms,
            ..Default::default()
        }
    }

    /// True when nothing besides the timestamp is present
    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.battery.is_none()
            && self.climate.is_none()
            && self.tpms_bar.is_none()
            && self.route.is_none()
            && self.history.is_empty()
            && self.path.is_none()
    }

    /// Copy the leaf section that owns `metric` out of `state`
    pub(crate) fn include_section_of(&mut self, metric: Metric, state: &CarState) {
        match metric {
            Metric::Speed | Metric::Heading | Metric::Elevation => {
                self.location = state.location.clone();
            }
            Metric::BatteryLevel | Metric::Power => self.battery = state.battery.clone(),
            Metric::InsideTemp | Metric::OutsideTemp => self.climate = state.climate.clone(),
            Metric::TireFrontLeft
            | Metric::TireFrontRight
            | Metric::TireRearLeft
            | Metric::TireRearRight => self.tpms_bar = state.tpms_bar.clone(),
        }
    }

    pub(crate) fn include_series(&mut self, metric: Metric, history: &HistoryWindow) {
        self.history.insert(metric, history.samples(metric));
    }

    /// Fold `other` into `self`.
    ///
    /// Sections present in `other` overwrite ours, history series are merged key by
    /// key, and the timestamp becomes the later of the two.
    pub fn merge(&mut self, other: Delta) {
        self.ts_ms = self.ts_ms.max(other.ts_ms);
        if other.location.is_some() {
            self.location = other.location;
        }
        if other.battery.is_some() {
            self.battery = other.battery;
        }
        if other.climate.is_some() {
            self.climate = other.climate;
        }
        if other.tpms_bar.is_some() {
            self.tpms_bar = other.tpms_bar;
        }
        if other.route.is_some() {
            self.route = other.route;
        }
        self.history.extend(other.history);
        if other.path.is_some() {
            self.path = other.path;
        }
    }
}

/// Combine the deltas produced for one car in one pass.
///
/// Empty deltas are skipped; returns `None` when nothing is left to send.
pub fn merge_deltas<I>(deltas: I) -> Option<Delta>
where
    I: IntoIterator<Item = Delta>,
{
    deltas
        .into_iter()
        .filter(|d| !d.is_empty())
        .reduce(|mut acc, d| {
            acc.merge(d);
            acc
        })
}

/// Full current state plus the whole history window for one car
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotPayload {
    pub ts_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<Battery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub climate: Option<Climate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpms_bar: Option<TirePressures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    pub history_30s: BTreeMap<Metric, Vec<Sample>>,
    pub path_30s: Vec<Breadcrumb>,
}

impl SnapshotPayload {
    pub fn new(state: CarState, history: &HistoryWindow) -> Self {
        Self {
            ts_ms: state.ts_ms,
            location: state.location,
            battery: state.battery,
            climate: state.climate,
            tpms_bar: state.tpms_bar,
            route: state.route,
            history_30s: history.all_series(),
            path_30s: history.path(),
        }
    }
}
