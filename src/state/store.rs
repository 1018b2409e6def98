use crate::state::delta::Delta;
use crate::state::model::{
    Breadcrumb, CarState, HistoryWindow, Location, MetadataField, Metric, Route, Sample,
    TirePosition,
};
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;

/// State and history owned by one car
#[derive(Clone, Debug, Default)]
struct CarEntry {
    state: CarState,
    history: HistoryWindow,
}

impl CarEntry {
    /// Set the leaf field for `metric` and append the sample to its series
    fn record(&mut self, metric: Metric, ts_ms: i64, value: f64) {
        let state = &mut self.state;
        match metric {
            Metric::Speed | Metric::Heading | Metric::Elevation => {
                let location = state.location.get_or_insert_with(Location::default);
                let slot = match metric {
                    Metric::Speed => &mut location.speed_kph,
                    Metric::Heading => &mut location.heading,
                    _ => &mut location.elevation_m,
                };
                *slot = Some(value);
            }
            Metric::BatteryLevel => {
                state.battery.get_or_insert_with(Default::default).soc_pct = Some(value)
            }
            Metric::Power => {
                state.battery.get_or_insert_with(Default::default).power_w = Some(value)
            }
            Metric::InsideTemp => {
                state.climate.get_or_insert_with(Default::default).inside_c = Some(value)
            }
            Metric::OutsideTemp => {
                state.climate.get_or_insert_with(Default::default).outside_c = Some(value)
            }
            Metric::TireFrontLeft => {
                let tires = state.tpms_bar.get_or_insert_with(Default::default);
                tires.set(TirePosition::FrontLeft, value)
            }
            Metric::TireFrontRight => {
                let tires = state.tpms_bar.get_or_insert_with(Default::default);
                tires.set(TirePosition::FrontRight, value)
            }
            Metric::TireRearLeft => {
                let tires = state.tpms_bar.get_or_insert_with(Default::default);
                tires.set(TirePosition::RearLeft, value)
            }
            Metric::TireRearRight => {
                let tires = state.tpms_bar.get_or_insert_with(Default::default);
                tires.set(TirePosition::RearRight, value)
            }
        }
        self.history.push(metric, Sample { ts_ms, v: value });
    }
}

/// Row returned by [`Store::list_cars`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CarSummary {
    pub id: i64,
    pub display_name: String,
}

/// Latest state plus bounded history for every car.
///
/// Each car lives in its own DashMap slot; a mutation holds that slot's write lock
/// for its whole duration, so readers never see half of an update and writers to
/// different cars only contend when they share a shard.
pub struct Store {
    entries: DashMap<i64, CarEntry>,

    /// History retention in milliseconds
    window_ms: i64,
}

impl Store {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Run `mutate` against an already-locked entry, prune with `ts_ms` as "now",
    /// then let `describe` build the delta from the pruned entry.
    fn update_entry<M, D>(
        &self,
        entry: &mut CarEntry,
        ts_ms: i64,
        mutate: M,
        describe: D,
    ) -> Delta
    where
        M: FnOnce(&mut CarEntry),
        D: FnOnce(&CarEntry, &mut Delta),
    {
        entry.state.ts_ms = ts_ms;
        mutate(entry);
        entry.history.prune(ts_ms.saturating_sub(self.window_ms));

        let mut delta = Delta::new(ts_ms);
        describe(entry, &mut delta);
        delta
    }

    fn update<M, D>(&self, car_id: i64, ts_ms: i64, mutate: M, describe: D) -> Delta
    where
        M: FnOnce(&mut CarEntry),
        D: FnOnce(&CarEntry, &mut Delta),
    {
        let mut entry = self.entries.entry(car_id).or_default();
        self.update_entry(entry.value_mut(), ts_ms, mutate, describe)
    }

    /// Record a position fix.
    ///
    /// Latitude and longitude are always updated and a breadcrumb is appended; speed,
    /// heading and elevation are only touched when present.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_location(
        &self,
        car_id: i64,
        ts_ms: i64,
        lat: f64,
        lon: f64,
        speed_kph: Option<f64>,
        heading: Option<f64>,
        elevation_m: Option<f64>,
    ) -> Delta {
        let mut entry = self.entries.entry(car_id).or_default();
        let extras = [
            (Metric::Speed, speed_kph),
            (Metric::Heading, heading),
            (Metric::Elevation, elevation_m),
        ];
        self.locate(entry.value_mut(), ts_ms, (lat, lon), extras)
    }

    fn locate(
        &self,
        entry: &mut CarEntry,
        ts_ms: i64,
        (lat, lon): (f64, f64),
        extras: [(Metric, Option<f64>); 3],
    ) -> Delta {
        self.update_entry(
            entry,
            ts_ms,
            |entry| {
                let location = entry.state.location.get_or_insert_with(Location::default);
                location.lat = Some(lat);
                location.lon = Some(lon);
                for (metric, value) in extras {
                    if let Some(v) = value {
                        entry.record(metric, ts_ms, v);
                    }
                }
                entry.history.path.push_back(Breadcrumb { ts_ms, lat, lon });
            },
            |entry, delta| {
                delta.location = entry.state.location.clone();
                for (metric, value) in extras {
                    if value.is_some() {
                        delta.include_series(metric, &entry.history);
                    }
                }
                delta.path = Some(entry.history.path());
            },
        )
    }

    /// Record a single scalar reading
    pub fn apply_metric(&self, car_id: i64, ts_ms: i64, metric: Metric, value: f64) -> Delta {
        let mut entry = self.entries.entry(car_id).or_default();
        self.measure(entry.value_mut(), ts_ms, metric, value)
    }

    fn measure(&self, entry: &mut CarEntry, ts_ms: i64, metric: Metric, value: f64) -> Delta {
        self.update_entry(
            entry,
            ts_ms,
            |entry| entry.record(metric, ts_ms, value),
            |entry, delta| {
                delta.include_section_of(metric, &entry.state);
                delta.include_series(metric, &entry.history);
            },
        )
    }

    pub fn apply_tire_pressure(
        &self,
        car_id: i64,
        ts_ms: i64,
        position: TirePosition,
        bar: f64,
    ) -> Delta {
        self.apply_metric(car_id, ts_ms, Metric::tire(position), bar)
    }

    /// Re-apply the latest value of every metric that already has history, plus the
    /// current position when one is known, all stamped with `now_ms`.
    ///
    /// Runs under the car's lock so a concurrent ingestion update can't be overwritten
    /// with the value read before it. A `now_ms` older than the car's last update is
    /// raised to it, keeping every series in timestamp order. Route is never
    /// resampled. Unknown cars yield nothing.
    pub fn resample(&self, car_id: i64, now_ms: i64) -> Vec<Delta> {
        let Some(mut entry) = self.entries.get_mut(&car_id) else {
            return Vec::new();
        };
        let entry = entry.value_mut();
        let now_ms = now_ms.max(entry.state.ts_ms);
        let mut deltas = Vec::new();

        if let Some(position) = entry.state.location.as_ref().and_then(Location::position) {
            let none = [
                (Metric::Speed, None),
                (Metric::Heading, None),
                (Metric::Elevation, None),
            ];
            deltas.push(self.locate(entry, now_ms, position, none));
        }
        for metric in Metric::ALL {
            if !entry.history.has_samples(metric) {
                continue;
            }
            if let Some(value) = metric.current(&entry.state) {
                deltas.push(self.measure(entry, now_ms, metric, value));
            }
        }
        deltas
    }

    /// Replace the route wholesale; routes keep no history
    pub fn apply_route(&self, car_id: i64, ts_ms: i64, route: Route) -> Delta {
        self.update(
            car_id,
            ts_ms,
            |entry| entry.state.route = Some(route),
            |entry, delta| delta.route = entry.state.route.clone(),
        )
    }

    /// Update descriptive metadata without producing a delta or touching history
    pub fn set_metadata_silently(
        &self,
        car_id: i64,
        ts_ms: i64,
        field: MetadataField,
        value: String,
    ) {
        let mut entry = self.entries.entry(car_id).or_default();
        entry.state.ts_ms = ts_ms;
        let slot = match field {
            MetadataField::DisplayName => &mut entry.state.display_name,
            MetadataField::Model => &mut entry.state.model,
            MetadataField::ExteriorColor => &mut entry.state.exterior_color,
        };
        *slot = Some(value);
    }

    /// Consistent copy of a car's state and history (creates the car if unseen)
    pub fn snapshot(&self, car_id: i64) -> (CarState, HistoryWindow) {
        let entry = self.entries.entry(car_id).or_default();
        (entry.state.clone(), entry.history.clone())
    }

    /// Copy of the latest state only, without cloning history
    pub fn current_state(&self, car_id: i64) -> Option<CarState> {
        self.entries.get(&car_id).map(|e| e.state.clone())
    }

    /// IDs of every car seen so far, ascending
    pub fn list_car_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entries.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// IDs with display names, ascending by ID
    pub fn list_cars(&self) -> Vec<CarSummary> {
        let mut cars: Vec<CarSummary> = self
            .entries
            .iter()
            .map(|e| CarSummary {
                id: *e.key(),
                display_name: e.value().state.display_name_or(*e.key()),
            })
            .collect();
        cars.sort_unstable_by_key(|c| c.id);
        cars
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
