use crate::api::{sse::stream_response, ApiError, AppState};
use crate::auth::{verify_admin_token, Destination};
use crate::state::{Breadcrumb, CarState, CarSummary, Metric, Sample};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Body for POST /api/v1/shares
#[derive(Deserialize)]
pub struct CreateShareRequest {
    pub car_id: i64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub arrive_radius_m: Option<f64>,
    #[serde(default)]
    pub dest: Option<Destination>,
}

#[derive(Serialize)]
pub struct CreateShareResponse {
    pub token: String,
    pub car_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct CarListResponse {
    cars: Vec<CarSummary>,
}

#[derive(Serialize)]
struct CarSnapshotResponse {
    state: CarState,
    history_30s: BTreeMap<Metric, Vec<Sample>>,
    path_30s: Vec<Breadcrumb>,
}

pub fn create_admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/shares", post(create_share))
        .route("/api/v1/admin/cars", get(list_cars))
        .route("/api/v1/admin/cars/:id", get(car_snapshot))
        .route("/api/v1/admin/cars/:id/stream", get(car_stream))
        .with_state(state)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    verify_admin_token(headers, state.admin_token.as_deref())?;
    Ok(())
}

fn parse_car_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid car ID '{}'", raw)))
}

/// POST /api/v1/shares
///
/// Without an explicit destination the car's current route destination is used.
async fn create_share(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateShareRequest>, JsonRejection>,
) -> Result<Json<CreateShareResponse>, ApiError> {
    authorize(&state, &headers)?;
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let dest = req
        .dest
        .or_else(|| {
            let route_dest = state.store.current_state(req.car_id)?.route?.dest?;
            Some(Destination {
                lat: route_dest.lat,
                lon: route_dest.lon,
                arrive_radius_m: None,
            })
        })
        .map(|d| Destination {
            arrive_radius_m: req.arrive_radius_m.or(d.arrive_radius_m),
            ..d
        });

    let share = match req.expires_at {
        Some(expires_at) => state.shares.issue_until(req.car_id, dest, expires_at)?,
        None => state.shares.issue(req.car_id, dest, state.share_ttl)?,
    };
    info!(
        car_id = share.car_id,
        expires_at = %share.expires_at,
        has_dest = share.dest.is_some(),
        "Share created"
    );

    Ok(Json(CreateShareResponse {
        token: share.token,
        car_id: share.car_id,
        expires_at: share.expires_at,
    }))
}

/// GET /api/v1/admin/cars
async fn list_cars(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CarListResponse>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(CarListResponse {
        cars: state.store.list_cars(),
    }))
}

/// GET /api/v1/admin/cars/:id
async fn car_snapshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CarSnapshotResponse>, ApiError> {
    authorize(&state, &headers)?;
    let car_id = parse_car_id(&id)?;
    if state.store.current_state(car_id).is_none() {
        return Err(ApiError::NotFound(format!("Car {} has not reported yet", car_id)));
    }

    let (car, history) = state.store.snapshot(car_id);
    Ok(Json(CarSnapshotResponse {
        state: car,
        history_30s: history.all_series(),
        path_30s: history.path(),
    }))
}

/// GET /api/v1/admin/cars/:id/stream
///
/// Same stream as a share link, without a geofence.
async fn car_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    let car_id = parse_car_id(&id)?;
    Ok(stream_response(&state, car_id, None))
}
