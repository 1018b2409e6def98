// Integration tests for the admin API: shares, car list, snapshots

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use carcast::api::{create_router, AppState};
use carcast::auth::ShareRegistry;
use carcast::config::CarcastConfig;
use carcast::state::{Coordinates, MetadataField, Metric, Route, Store};
use carcast::stream::Hub;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<Store>,
    shares: Arc<ShareRegistry>,
}

fn create_test_app(admin_token: Option<&str>) -> TestApp {
    let mut config = CarcastConfig::default();
    config.http.admin_token = admin_token.map(|t| t.to_string());
    config.state.window_seconds = 30;

    let store = Arc::new(Store::new(config.state.window()));
    let hub = Arc::new(Hub::new());
    let shares = Arc::new(ShareRegistry::new(config.stream.default_arrive_radius_m));
    let state = AppState::new(Arc::clone(&store), hub, Arc::clone(&shares), &config);

    TestApp {
        router: create_router(Arc::new(state), &[]),
        store,
        shares,
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_share(body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/shares")
        .header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("authorization", bearer(t));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// GET /api/v1/admin/cars lists cars by ID with display-name fallback.
#[tokio::test]
async fn test_list_cars() {
    let app = create_test_app(None);
    let (status, body) = send(&app, get("/api/v1/admin/cars")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"cars": []}));

    app.store.apply_metric(2, 1_000, Metric::Speed, 10.0);
    app.store
        .set_metadata_silently(1, 1_000, MetadataField::DisplayName, "Model Y".to_string());

    let (status, body) = send(&app, get("/api/v1/admin/cars")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"cars": [
            {"id": 1, "display_name": "Model Y"},
            {"id": 2, "display_name": "Car 2"}
        ]})
    );
}

/// Admin routes reject missing or wrong bearer tokens when a token is configured.
#[tokio::test]
async fn test_admin_token_required() {
    let app = create_test_app(Some("secret"));

    let (status, body) = send(&app, get("/api/v1/admin/cars")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let wrong = Request::builder()
        .uri("/api/v1/admin/cars")
        .header("authorization", bearer("guess"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = Request::builder()
        .uri("/api/v1/admin/cars")
        .header("authorization", bearer("secret"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, right).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, post_share(json!({"car_id": 1}), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// POST /api/v1/shares issues a token that verifies to the requested car.
#[tokio::test]
async fn test_create_share_with_destination() {
    let app = create_test_app(Some("secret"));
    let request = post_share(
        json!({
            "car_id": 7,
            "dest": {"lat": 52.52, "lon": 13.405},
            "arrive_radius_m": 250.0
        }),
        Some("secret"),
    );

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["car_id"], 7);
    let expires_at: DateTime<Utc> = body["expires_at"].as_str().unwrap().parse().unwrap();
    assert!(expires_at > Utc::now() + ChronoDuration::hours(7));

    let grant = app.shares.verify(body["token"].as_str().unwrap()).unwrap();
    assert_eq!(grant.car_id, 7);
    let fence = grant.geofence.unwrap();
    assert_eq!((fence.lat, fence.lon, fence.radius_m), (52.52, 13.405, 250.0));
}

/// Without a destination the car's active route destination is used.
#[tokio::test]
async fn test_create_share_uses_route_destination() {
    let app = create_test_app(None);
    app.store.apply_route(
        3,
        1_000,
        Route {
            dest: Some(Coordinates { lat: 48.1, lon: 11.5 }),
            eta_min: 20.0,
            dist_km: 15.0,
            ..Route::default()
        },
    );

    let (status, body) = send(&app, post_share(json!({"car_id": 3}), None)).await;
    assert_eq!(status, StatusCode::OK);

    let grant = app.shares.verify(body["token"].as_str().unwrap()).unwrap();
    let fence = grant.geofence.unwrap();
    assert_eq!((fence.lat, fence.lon), (48.1, 11.5));
    assert_eq!(fence.radius_m, 100.0);
}

/// A share for a car with no route carries no geofence.
#[tokio::test]
async fn test_create_share_without_any_destination() {
    let app = create_test_app(None);
    let (status, body) = send(&app, post_share(json!({"car_id": 4}), None)).await;
    assert_eq!(status, StatusCode::OK);

    let grant = app.shares.verify(body["token"].as_str().unwrap()).unwrap();
    assert_eq!(grant.geofence, None);
}

/// Expiry in the past and malformed bodies are rejected with 400.
#[tokio::test]
async fn test_create_share_rejects_bad_requests() {
    let app = create_test_app(None);
    let past = (Utc::now() - ChronoDuration::minutes(5)).to_rfc3339();

    let request = post_share(json!({"car_id": 1, "expires_at": past}), None);
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, _) = send(&app, post_share(json!({"expires_at": "soon"}), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.shares.is_empty());
}

/// A future `expires_at` is honored exactly.
#[tokio::test]
async fn test_create_share_with_explicit_expiry() {
    let app = create_test_app(None);
    let expires = Utc::now() + ChronoDuration::minutes(30);

    let (status, body) = send(
        &app,
        post_share(json!({"car_id": 1, "expires_at": expires.to_rfc3339()}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let returned: DateTime<Utc> = body["expires_at"].as_str().unwrap().parse().unwrap();
    assert_eq!(returned, expires);
}

/// GET /api/v1/admin/cars/:id returns state plus history.
#[tokio::test]
async fn test_car_snapshot() {
    let app = create_test_app(None);
    app.store
        .apply_location(5, 1_000, 1.0, 2.0, Some(30.0), None, None);
    app.store.apply_metric(5, 2_000, Metric::Speed, 35.0);

    let (status, body) = send(&app, get("/api/v1/admin/cars/5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["ts_ms"], 2000);
    assert_eq!(body["state"]["location"]["speed_kph"], 35.0);
    assert_eq!(body["history_30s"]["speed_kph"].as_array().unwrap().len(), 2);
    assert_eq!(body["history_30s"]["soc_pct"], json!([]));
    assert_eq!(body["path_30s"], json!([{"ts_ms": 1000, "lat": 1.0, "lon": 2.0}]));
}

/// Unknown and malformed car IDs.
#[tokio::test]
async fn test_car_snapshot_errors() {
    let app = create_test_app(None);

    let (status, body) = send(&app, get("/api/v1/admin/cars/99")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = send(&app, get("/api/v1/admin/cars/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Lookups must not register the car
    assert!(app.store.is_empty());
}
