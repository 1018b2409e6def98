use crate::state::{Coordinates, MetadataField, Metric, Route, TirePosition};
use serde::Deserialize;
use serde_json::Value;

/// One normalized inbound update, independent of the transport it arrived on
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryUpdate {
    Location { lat: f64, lon: f64 },
    Metric { metric: Metric, value: f64 },
    Route(Route),
    Metadata { field: MetadataField, value: String },
}

/// Why an inbound message was dropped
#[derive(Debug, PartialEq, Clone)]
pub enum TopicError {
    /// Topic does not start with the configured prefix
    ForeignTopic(String),
    /// Car ID segment is not an integer
    InvalidCarId(String),
    /// Leaf name is not one we route
    UnknownLeaf(String),
    /// Payload could not be decoded for the leaf
    InvalidPayload { leaf: String, reason: String },
}

impl std::fmt::Display for TopicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicError::ForeignTopic(topic) => write!(f, "Topic '{}' is not a car topic", topic),
            TopicError::InvalidCarId(id) => write!(f, "Invalid car ID '{}'", id),
            TopicError::UnknownLeaf(leaf) => write!(f, "Unknown topic leaf '{}'", leaf),
            TopicError::InvalidPayload { leaf, reason } => {
                write!(f, "Invalid payload for '{}': {}", leaf, reason)
            }
        }
    }
}

impl std::error::Error for TopicError {}

/// Split `{prefix}/{car_id}/{leaf}` into its car ID and leaf
pub fn split_topic<'a>(prefix: &str, topic: &'a str) -> Result<(i64, &'a str), TopicError> {
    let prefix = prefix.trim_end_matches('/');
    let rest = topic
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| TopicError::ForeignTopic(topic.to_string()))?;

    let (id, leaf) = rest
        .split_once('/')
        .ok_or_else(|| TopicError::ForeignTopic(topic.to_string()))?;
    if leaf.is_empty() || leaf.contains('/') {
        return Err(TopicError::UnknownLeaf(leaf.to_string()));
    }
    let car_id = id
        .parse::<i64>()
        .map_err(|_| TopicError::InvalidCarId(id.to_string()))?;
    Ok((car_id, leaf))
}

/// Decode one message into a car ID and a normalized update
pub fn parse_message(
    prefix: &str,
    topic: &str,
    payload: &str,
) -> Result<(i64, TelemetryUpdate), TopicError> {
    let (car_id, leaf) = split_topic(prefix, topic)?;
    let update = parse_leaf(leaf, payload)?;
    Ok((car_id, update))
}

/// Decode a payload for a known leaf name
pub fn parse_leaf(leaf: &str, payload: &str) -> Result<TelemetryUpdate, TopicError> {
    if let Some(metric) = scalar_metric(leaf) {
        let value = parse_number(leaf, payload)?;
        return Ok(TelemetryUpdate::Metric { metric, value });
    }

    match leaf {
        "location" => parse_location(payload),
        "active_route" => parse_route(payload).map(TelemetryUpdate::Route),
        "display_name" => Ok(metadata(MetadataField::DisplayName, payload)),
        "model" => Ok(metadata(MetadataField::Model, payload)),
        "exterior_color" => Ok(metadata(MetadataField::ExteriorColor, payload)),
        other => Err(TopicError::UnknownLeaf(other.to_string())),
    }
}

fn scalar_metric(leaf: &str) -> Option<Metric> {
    let metric = match leaf {
        "speed" => Metric::Speed,
        "heading" => Metric::Heading,
        "elevation" => Metric::Elevation,
        "battery_level" => Metric::BatteryLevel,
        "power" => Metric::Power,
        "inside_temp" => Metric::InsideTemp,
        "outside_temp" => Metric::OutsideTemp,
        _ => {
            let position = leaf.strip_prefix("tpms_pressure_")?;
            return TirePosition::parse(position).map(Metric::tire);
        }
    };
    Some(metric)
}

fn invalid(leaf: &str, reason: impl Into<String>) -> TopicError {
    TopicError::InvalidPayload {
        leaf: leaf.to_string(),
        reason: reason.into(),
    }
}

fn parse_number(leaf: &str, payload: &str) -> Result<f64, TopicError> {
    let text = payload.trim();
    let value = text
        .parse::<f64>()
        .map_err(|_| invalid(leaf, format!("'{}' is not a number", text)))?;
    if !value.is_finite() {
        return Err(invalid(leaf, "value is not finite"));
    }
    Ok(value)
}

#[derive(Deserialize)]
struct LocationPayload {
    latitude: f64,
    longitude: f64,
}

fn parse_location(payload: &str) -> Result<TelemetryUpdate, TopicError> {
    let loc: LocationPayload =
        serde_json::from_str(payload).map_err(|e| invalid("location", e.to_string()))?;
    Ok(TelemetryUpdate::Location {
        lat: loc.latitude,
        lon: loc.longitude,
    })
}

fn metadata(field: MetadataField, payload: &str) -> TelemetryUpdate {
    TelemetryUpdate::Metadata {
        field,
        value: payload.trim().to_string(),
    }
}

/// JSON number or numeric string
fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn first_number(obj: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| number(obj.get(key)))
}

fn parse_route(payload: &str) -> Result<Route, TopicError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| invalid("active_route", e.to_string()))?;
    if !value.is_object() {
        return Err(invalid("active_route", "expected a JSON object"));
    }

    let dest = value.get("destination").and_then(|d| {
        let lat = first_number(d, &["lat", "latitude"])?;
        let lon = first_number(d, &["lng", "lon", "longitude"])?;
        Some(Coordinates { lat, lon })
    });
    let dest_label = ["destination_label", "location"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    Ok(Route {
        dest,
        eta_min: first_number(&value, &["eta_minutes", "eta_min"]).unwrap_or(0.0),
        dist_km: first_number(&value, &["distance_km", "dist_km"]).unwrap_or(0.0),
        dest_label,
        traffic_delay_min: first_number(&value, &["traffic_minutes_delay", "traffic_delay_min"])
            .unwrap_or(0.0),
    })
}
