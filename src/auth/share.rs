use crate::stream::Geofence;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Where a shared stream is headed; the stream ends once the car gets there
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub lat: f64,
    pub lon: f64,
    /// Falls back to the registry default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrive_radius_m: Option<f64>,
}

impl Destination {
    fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && self.arrive_radius_m.map_or(true, |r| r.is_finite() && r >= 0.0)
    }
}

/// An issued share link
#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    /// Opaque bearer token (UUID v4)
    pub token: String,
    pub car_id: i64,
    pub dest: Option<Destination>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What a verified share token allows: one car, optionally bounded by a geofence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamGrant {
    pub car_id: i64,
    pub geofence: Option<Geofence>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ShareError {
    /// Token was never issued (or already purged)
    Unknown,
    /// Token is past its expiry
    Expired,
    /// Requested expiry is not in the future
    ExpiryInPast,
    /// Destination coordinates or radius out of range
    InvalidDestination,
}

impl std::fmt::Display for ShareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShareError::Unknown => write!(f, "Share token not recognised"),
            ShareError::Expired => write!(f, "Share token has expired"),
            ShareError::ExpiryInPast => write!(f, "Share expiry must be in the future"),
            ShareError::InvalidDestination => write!(f, "Share destination is out of range"),
        }
    }
}

impl std::error::Error for ShareError {}

/// Registry of issued share links, keyed by token
pub struct ShareRegistry {
    shares: DashMap<String, Share>,
    default_radius_m: f64,
}

impl ShareRegistry {
    pub fn new(default_radius_m: f64) -> Self {
        Self {
            shares: DashMap::new(),
            default_radius_m,
        }
    }

    /// Issue a share valid for `ttl` from now
    pub fn issue(
        &self,
        car_id: i64,
        dest: Option<Destination>,
        ttl: Duration,
    ) -> Result<Share, ShareError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| ShareError::ExpiryInPast)?;
        self.issue_at(now, car_id, dest, now + ttl)
    }

    /// Issue a share that expires at `expires_at`
    pub fn issue_until(
        &self,
        car_id: i64,
        dest: Option<Destination>,
        expires_at: DateTime<Utc>,
    ) -> Result<Share, ShareError> {
        self.issue_at(Utc::now(), car_id, dest, expires_at)
    }

    pub(crate) fn issue_at(
        &self,
        now: DateTime<Utc>,
        car_id: i64,
        dest: Option<Destination>,
        expires_at: DateTime<Utc>,
    ) -> Result<Share, ShareError> {
        if expires_at <= now {
            return Err(ShareError::ExpiryInPast);
        }
        if dest.is_some_and(|d| !d.is_valid()) {
            return Err(ShareError::InvalidDestination);
        }

        let share = Share {
            token: Uuid::new_v4().to_string(),
            car_id,
            dest,
            created_at: now,
            expires_at,
        };
        self.shares.insert(share.token.clone(), share.clone());
        debug!(car_id = car_id, expires_at = %expires_at, "Share issued");
        Ok(share)
    }

    /// Resolve a token into the grant it carries
    pub fn verify(&self, token: &str) -> Result<StreamGrant, ShareError> {
        self.verify_at(token, Utc::now())
    }

    pub(crate) fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<StreamGrant, ShareError> {
        let share = self
            .shares
            .get(token)
            .map(|s| s.clone())
            .ok_or(ShareError::Unknown)?;

        if share.expires_at <= now {
            self.shares.remove(token);
            return Err(ShareError::Expired);
        }

        let geofence = share.dest.and_then(|d| {
            Geofence::new(d.lat, d.lon, d.arrive_radius_m.unwrap_or(self.default_radius_m))
        });
        Ok(StreamGrant {
            car_id: share.car_id,
            geofence,
        })
    }

    /// Drop every expired share, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub(crate) fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.shares.len();
        self.shares.retain(|_, share| share.expires_at > now);
        before - self.shares.len()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}
