use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// One `(timestamp, value)` point of a metric's history
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ts_ms: i64,
    pub v: f64,
}

/// Timestamped position retained in the path history
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub ts_ms: i64,
    pub lat: f64,
    pub lon: f64,
}

/// Metrics that keep a windowed history.
///
/// Serialized names are the keys used inside `history_30s`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "speed_kph")]
    Speed,
    #[serde(rename = "heading")]
    Heading,
    #[serde(rename = "elevation_m")]
    Elevation,
    #[serde(rename = "soc_pct")]
    BatteryLevel,
    #[serde(rename = "power_w")]
    Power,
    #[serde(rename = "inside_c")]
    InsideTemp,
    #[serde(rename = "outside_c")]
    OutsideTemp,
    #[serde(rename = "tpms_fl")]
    TireFrontLeft,
    #[serde(rename = "tpms_fr")]
    TireFrontRight,
    #[serde(rename = "tpms_rl")]
    TireRearLeft,
    #[serde(rename = "tpms_rr")]
    TireRearRight,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::Speed,
        Metric::Heading,
        Metric::Elevation,
        Metric::BatteryLevel,
        Metric::Power,
        Metric::InsideTemp,
        Metric::OutsideTemp,
        Metric::TireFrontLeft,
        Metric::TireFrontRight,
        Metric::TireRearLeft,
        Metric::TireRearRight,
    ];

    /// Tire pressure metric for a wheel position
    pub fn tire(position: TirePosition) -> Self {
        match position {
            TirePosition::FrontLeft => Metric::TireFrontLeft,
            TirePosition::FrontRight => Metric::TireFrontRight,
            TirePosition::RearLeft => Metric::TireRearLeft,
            TirePosition::RearRight => Metric::TireRearRight,
        }
    }

    /// Current value of this metric in `state`, if it has ever been observed
    pub fn current(self, state: &CarState) -> Option<f64> {
        match self {
            Metric::Speed => state.location.as_ref()?.speed_kph,
            Metric::Heading => state.location.as_ref()?.heading,
            Metric::Elevation => state.location.as_ref()?.elevation_m,
            Metric::BatteryLevel => state.battery.as_ref()?.soc_pct,
            Metric::Power => state.battery.as_ref()?.power_w,
            Metric::InsideTemp => state.climate.as_ref()?.inside_c,
            Metric::OutsideTemp => state.climate.as_ref()?.outside_c,
            Metric::TireFrontLeft => state.tpms_bar.as_ref()?.fl,
            Metric::TireFrontRight => state.tpms_bar.as_ref()?.fr,
            Metric::TireRearLeft => state.tpms_bar.as_ref()?.rl,
            Metric::TireRearRight => state.tpms_bar.as_ref()?.rr,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TirePosition {
    #[serde(rename = "fl")]
    FrontLeft,
    #[serde(rename = "fr")]
    FrontRight,
    #[serde(rename = "rl")]
    RearLeft,
    #[serde(rename = "rr")]
    RearRight,
}

impl TirePosition {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fl" => Some(TirePosition::FrontLeft),
            "fr" => Some(TirePosition::FrontRight),
            "rl" => Some(TirePosition::RearLeft),
            "rr" => Some(TirePosition::RearRight),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation_m: Option<f64>,
}

impl Location {
    /// `(lat, lon)` once a position has been reported
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soc_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_w: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Climate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inside_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outside_c: Option<f64>,
}

/// Tire pressures in bar
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TirePressures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rr: Option<f64>,
}

impl TirePressures {
    fn slot(&mut self, position: TirePosition) -> &mut Option<f64> {
        match position {
            TirePosition::FrontLeft => &mut self.fl,
            TirePosition::FrontRight => &mut self.fr,
            TirePosition::RearLeft => &mut self.rl,
            TirePosition::RearRight => &mut self.rr,
        }
    }

    pub fn set(&mut self, position: TirePosition, bar: f64) {
        *self.slot(position) = Some(bar);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Active navigation route; replaced wholesale on every update
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<Coordinates>,
    pub eta_min: f64,
    pub dist_km: f64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub dest_label: String,
    pub traffic_delay_min: f64,
}

/// Descriptive fields that change rarely and are never broadcast
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataField {
    DisplayName,
    Model,
    ExteriorColor,
}

/// Latest known values for one car
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CarState {
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
    #[serde(skip)]
    pub display_name: Option<String>,
    #[serde(skip)]
    pub model: Option<String>,
    #[serde(skip)]
    pub exterior_color: Option<String>,
}

impl CarState {
    /// Human-readable name, falling back to the numeric ID
    pub fn display_name_or(&self, car_id: i64) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("Car {}", car_id),
        }
    }
}

/// Per-metric bounded time series plus position breadcrumbs
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryWindow {
    pub series: BTreeMap<Metric, VecDeque<Sample>>,
    pub path: VecDeque<Breadcrumb>,
}

impl HistoryWindow {
    pub fn push(&mut self, metric: Metric, sample: Sample) {
        self.series.entry(metric).or_default().push_back(sample);
    }

    /// Samples recorded for `metric`, oldest first
    pub fn samples(&self, metric: Metric) -> Vec<Sample> {
        self.series
            .get(&metric)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_samples(&self, metric: Metric) -> bool {
        self.series.get(&metric).is_some_and(|s| !s.is_empty())
    }

    /// Drop everything older than `cutoff_ms`
    pub fn prune(&mut self, cutoff_ms: i64) {
        for samples in self.series.values_mut() {
            while samples.front().is_some_and(|s| s.ts_ms < cutoff_ms) {
                samples.pop_front();
            }
        }
        while self.path.front().is_some_and(|b| b.ts_ms < cutoff_ms) {
            self.path.pop_front();
        }
    }

    /// Every metric with its samples (empty when never observed), for full snapshots
    pub fn all_series(&self) -> BTreeMap<Metric, Vec<Sample>> {
        Metric::ALL.iter().map(|&m| (m, self.samples(m))).collect()
    }

    pub fn path(&self) -> Vec<Breadcrumb> {
        self.path.iter().copied().collect()
    }
}
