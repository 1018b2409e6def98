use crate::state::{SnapshotPayload, Store};
use crate::stream::frame::Frame;
use crate::stream::geofence::Geofence;
use crate::stream::hub::{Hub, Subscription};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Lifecycle of one streaming connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Authenticating,
    SnapshotSent,
    Streaming,
    Closed,
}

/// Why a session stopped streaming
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection's cancellation signal fired
    Cancelled,
    /// The car reached the geofence
    Arrived,
    /// The transport stopped accepting frames (client went away)
    TransportClosed,
    /// The subscriber queue was closed from the hub side
    HubClosed,
}

/// Failures reported to the caller before streaming starts
#[derive(Debug)]
pub enum SessionError {
    /// Snapshot could not be encoded
    Encode(serde_json::Error),
    /// Transport refused the initial snapshot
    TransportUnavailable,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Encode(e) => write!(f, "Failed to encode snapshot: {}", e),
            SessionError::TransportUnavailable => write!(f, "Transport cannot deliver frames"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Per-connection streaming protocol.
///
/// Sends one snapshot, then forwards hub deltas and periodic heartbeats into the
/// transport until cancelled, the transport closes, or the geofence fires.
pub struct StreamSession {
    store: Arc<Store>,
    hub: Arc<Hub>,
    car_id: i64,
    geofence: Option<Geofence>,
    heartbeat: Duration,
    phase: SessionPhase,
}

impl StreamSession {
    /// The caller has already verified that this connection may observe `car_id`
    pub fn new(
        store: Arc<Store>,
        hub: Arc<Hub>,
        car_id: i64,
        geofence: Option<Geofence>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            car_id,
            geofence,
            heartbeat: heartbeat.max(MIN_HEARTBEAT),
            phase: SessionPhase::Authenticating,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn car_id(&self) -> i64 {
        self.car_id
    }

    fn transition(&mut self, next: SessionPhase) {
        debug!(car_id = self.car_id, from = ?self.phase, to = ?next, "Stream session phase change");
        self.phase = next;
    }

    /// Drive the session to completion.
    ///
    /// `cancel` resolves when the connection goes away; it always wins over pending
    /// deltas or heartbeats.
    pub async fn run<C>(
        &mut self,
        sink: mpsc::Sender<Frame>,
        cancel: C,
    ) -> Result<CloseReason, SessionError>
    where
        C: Future<Output = ()>,
    {
        let (state, history) = self.store.snapshot(self.car_id);
        let snapshot = match Frame::snapshot(&SnapshotPayload::new(state, &history)) {
            Ok(frame) => frame,
            Err(e) => {
                self.transition(SessionPhase::Closed);
                return Err(SessionError::Encode(e));
            }
        };
        if sink.send(snapshot).await.is_err() {
            self.transition(SessionPhase::Closed);
            return Err(SessionError::TransportUnavailable);
        }
        self.transition(SessionPhase::SnapshotSent);

        let reason = self.stream(&sink, cancel).await;
        self.transition(SessionPhase::Closed);
        debug!(car_id = self.car_id, reason = ?reason, "Stream session closed");
        Ok(reason)
    }

    async fn stream<C>(&mut self, sink: &mpsc::Sender<Frame>, cancel: C) -> CloseReason
    where
        C: Future<Output = ()>,
    {
        // Dropping the subscription on return unsubscribes on every exit path
        let mut subscription = Subscription::new(Arc::clone(&self.hub), self.car_id);
        self.transition(SessionPhase::Streaming);

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(cancel);

        loop {
            let frame = tokio::select! {
                biased;
                _ = &mut cancel => return CloseReason::Cancelled,
                next = subscription.recv() => match next {
                    Some(frame) => frame,
                    None => return CloseReason::HubClosed,
                },
                _ = heartbeat.tick() => Frame::heartbeat(Utc::now()),
            };
            if frame.is_empty() {
                continue;
            }
            let sent = tokio::select! {
                biased;
                _ = &mut cancel => return CloseReason::Cancelled,
                sent = sink.send(frame) => sent,
            };
            if sent.is_err() {
                return CloseReason::TransportClosed;
            }
            if self.arrived() {
                return CloseReason::Arrived;
            }
        }
    }

    /// Geofence check against the car's current position
    fn arrived(&self) -> bool {
        let Some(geofence) = self.geofence else {
            return false;
        };
        let position = self
            .store
            .current_state(self.car_id)
            .and_then(|s| s.location)
            .and_then(|l| l.position());
        geofence.arrived(position)
    }
}
