// Fan-out hub and per-connection streaming sessions

mod frame;
mod geofence;
mod hub;
mod session;

pub use frame::{Frame, FrameKind};
pub use geofence::{haversine_meters, Geofence, EARTH_RADIUS_M};
pub use hub::{Hub, Subscriber, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use session::{CloseReason, SessionError, SessionPhase, StreamSession};
