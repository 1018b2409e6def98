use crate::api::AppState;
use crate::stream::{Frame, Geofence, SessionError, StreamSession};
use axum::{
    http::{header, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

/// Frames buffered between the session task and the HTTP body
const TRANSPORT_BUFFER: usize = 16;

/// Resolves once shutdown is signalled; never if the signal can no longer fire
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn to_event(frame: &Frame) -> Event {
    Event::default().event(frame.event()).data(frame.data())
}

/// Start a streaming session for `car_id` and return it as an SSE response.
///
/// The session runs on its own task and is cancelled when the client goes away;
/// the response body ends when the session does.
pub(crate) fn stream_response(
    state: &AppState,
    car_id: i64,
    geofence: Option<Geofence>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Frame>(TRANSPORT_BUFFER);
    let mut session = StreamSession::new(
        Arc::clone(&state.store),
        Arc::clone(&state.hub),
        car_id,
        geofence,
        state.heartbeat,
    );

    let watcher = tx.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let cancel = async move {
            tokio::select! {
                _ = watcher.closed() => {}
                _ = shutdown_requested(shutdown) => {}
            }
        };
        match session.run(tx, cancel).await {
            Ok(reason) => debug!(car_id = car_id, reason = ?reason, "Stream ended"),
            Err(SessionError::TransportUnavailable) => {
                debug!(car_id = car_id, "Client left before snapshot")
            }
            Err(e) => error!(car_id = car_id, error = %e, "Stream session failed"),
        }
    });

    let events = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(to_event(&frame)));
    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
