use crate::state::{Delta, SnapshotPayload};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Outbound event names
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Snapshot,
    Delta,
    Heartbeat,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Snapshot => "snapshot",
            FrameKind::Delta => "delta",
            FrameKind::Heartbeat => "heartbeat",
        }
    }
}

/// One outbound message: an event name and its JSON payload.
///
/// The payload is encoded once and shared, so fanning a frame out to many
/// subscribers only bumps a refcount.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    kind: FrameKind,
    data: Arc<str>,
}

#[derive(Serialize)]
struct HeartbeatPayload {
    server_time: String,
}

impl Frame {
    fn encode<T: Serialize>(kind: FrameKind, payload: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(payload)?;
        Ok(Self {
            kind,
            data: Arc::from(json),
        })
    }

    pub fn snapshot(payload: &SnapshotPayload) -> Result<Self, serde_json::Error> {
        Self::encode(FrameKind::Snapshot, payload)
    }

    /// Encode a delta; empty deltas produce no frame
    pub fn delta(delta: &Delta) -> Result<Option<Self>, serde_json::Error> {
        if delta.is_empty() {
            return Ok(None);
        }
        Self::encode(FrameKind::Delta, delta).map(Some)
    }

    pub fn heartbeat(at: DateTime<Utc>) -> Self {
        let payload = HeartbeatPayload {
            server_time: at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        };
        // A struct holding one String always serializes
        Self::encode(FrameKind::Heartbeat, &payload).unwrap_or_else(|_| Self {
            kind: FrameKind::Heartbeat,
            data: Arc::from("{}"),
        })
    }

    /// Raw frame, used by tests and callers that build their own payloads
    pub fn from_parts(kind: FrameKind, data: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn event(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
