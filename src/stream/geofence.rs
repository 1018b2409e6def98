/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Allowance added to the arrival radius to absorb haversine rounding at the edge
const ARRIVAL_SLACK_M: f64 = 0.1;

/// Haversine distance in meters between two `(lat, lon)` points in degrees
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Destination plus arrival radius that ends a stream once reached
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geofence {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
}

impl Geofence {
    /// `None` unless the radius is positive; a zero radius means "never expire"
    pub fn new(lat: f64, lon: f64, radius_m: f64) -> Option<Self> {
        (radius_m > 0.0).then_some(Self { lat, lon, radius_m })
    }

    /// True when `position` lies within the arrival radius
    pub fn arrived(&self, position: Option<(f64, f64)>) -> bool {
        let Some((lat, lon)) = position else {
            return false;
        };
        haversine_meters(lat, lon, self.lat, self.lon) <= self.radius_m + ARRIVAL_SLACK_M
    }
}
