use crate::api::{sse::stream_response, ApiError, AppState};
use crate::auth::non_empty_token;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize)]
pub struct StreamParams {
    pub token: Option<String>,
}

pub fn create_public_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/stream", get(share_stream))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// GET /api/v1/stream?token=T
///
/// Live stream for the car a share token grants, ending at its destination.
async fn share_stream(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let token = non_empty_token(params.token.as_deref())?;
    let grant = state.shares.verify(token)?;
    debug!(car_id = grant.car_id, geofenced = grant.geofence.is_some(), "Share stream opened");
    Ok(stream_response(&state, grant.car_id, grant.geofence))
}
