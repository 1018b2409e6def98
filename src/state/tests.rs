use super::*;
use crate::stream::{FrameKind, Hub};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

const WINDOW: Duration = Duration::from_secs(30);

fn store() -> Store {
    Store::new(WINDOW)
}

fn to_json(delta: &Delta) -> Value {
    serde_json::to_value(delta).unwrap()
}

#[test]
fn test_speed_update_creates_car_and_delta() {
    let store = store();

    let delta = store.apply_metric(7, 1_000, Metric::Speed, 42.0);

    assert_eq!(delta.ts_ms, 1_000);
    assert_eq!(delta.location.as_ref().unwrap().speed_kph, Some(42.0));
    assert_eq!(
        delta.history[&Metric::Speed],
        vec![Sample { ts_ms: 1_000, v: 42.0 }]
    );
    assert_eq!(store.list_car_ids(), vec![7]);

    let json = to_json(&delta);
    assert_eq!(json["location"]["speed_kph"], json!(42.0));
    assert_eq!(json["history_30s"]["speed_kph"], json!([{"ts_ms": 1000, "v": 42.0}]));
}

#[test]
fn test_metric_delta_excludes_unrelated_sections() {
    let store = store();
    store.apply_metric(1, 1_000, Metric::BatteryLevel, 80.0);
    store.apply_metric(1, 1_000, Metric::InsideTemp, 21.0);

    let json = to_json(&store.apply_metric(1, 2_000, Metric::Speed, 50.0));

    assert!(json.get("battery").is_none());
    assert!(json.get("climate").is_none());
    assert!(json.get("route").is_none());
    assert!(json.get("path_30s").is_none());
    let history = json["history_30s"].as_object().unwrap();
    assert_eq!(history.len(), 1);
    assert!(history.contains_key("speed_kph"));
}

#[test]
fn test_battery_delta_carries_whole_section() {
    let store = store();
    store.apply_metric(1, 1_000, Metric::Power, -3_500.0);

    let delta = store.apply_metric(1, 2_000, Metric::BatteryLevel, 64.0);

    let battery = delta.battery.unwrap();
    assert_eq!(battery.soc_pct, Some(64.0));
    assert_eq!(battery.power_w, Some(-3_500.0));
    assert!(!delta.history.contains_key(&Metric::Power));
}

#[test]
fn test_tire_pressure_delta() {
    let store = store();

    let delta = store.apply_tire_pressure(3, 1_000, TirePosition::RearLeft, 2.9);

    assert_eq!(delta.tpms_bar.as_ref().unwrap().rl, Some(2.9));
    assert_eq!(delta.tpms_bar.as_ref().unwrap().fl, None);
    assert_eq!(
        delta.history[&Metric::TireRearLeft],
        vec![Sample { ts_ms: 1_000, v: 2.9 }]
    );
    assert_eq!(to_json(&delta)["tpms_bar"], json!({"rl": 2.9}));
}

#[test]
fn test_location_without_extras_only_moves_position() {
    let store = store();

    let delta = store.apply_location(1, 1_000, 51.05, 3.72, None, None, None);

    let location = delta.location.unwrap();
    assert_eq!(location.position(), Some((51.05, 3.72)));
    assert_eq!(location.speed_kph, None);
    assert!(delta.history.is_empty());
    assert_eq!(
        delta.path.unwrap(),
        vec![Breadcrumb { ts_ms: 1_000, lat: 51.05, lon: 3.72 }]
    );

    let (_, history) = store.snapshot(1);
    assert!(!history.has_samples(Metric::Speed));
}

#[test]
fn test_location_accepts_zero_and_negative_readings() {
    let store = store();

    let delta = store.apply_location(1, 1_000, -33.9, 18.4, Some(0.0), Some(0.0), Some(-12.0));

    let location = delta.location.unwrap();
    assert_eq!(location.speed_kph, Some(0.0));
    assert_eq!(location.elevation_m, Some(-12.0));
    assert_eq!(delta.history.len(), 3);
    assert_eq!(
        delta.history[&Metric::Elevation],
        vec![Sample { ts_ms: 1_000, v: -12.0 }]
    );
}

#[test]
fn test_pruning_uses_mutation_timestamp() {
    let store = store();
    let window_ms = WINDOW.as_millis() as i64;

    let mut ts = 0;
    for i in 0..200 {
        ts += 750;
        store.apply_metric(1, ts, Metric::Speed, i as f64);
        store.apply_location(1, ts, 0.0, i as f64 * 0.001, None, None, None);

        let (_, history) = store.snapshot(1);
        for sample in history.samples(Metric::Speed) {
            assert!(sample.ts_ms >= ts - window_ms);
        }
        for crumb in history.path() {
            assert!(crumb.ts_ms >= ts - window_ms);
        }
    }

    let (_, history) = store.snapshot(1);
    // 30s window at 750ms spacing keeps the boundary sample too
    assert_eq!(history.samples(Metric::Speed).len(), 41);
}

#[test]
fn test_pruning_touches_every_series() {
    let store = store();
    store.apply_metric(1, 0, Metric::OutsideTemp, 9.0);
    store.apply_location(1, 0, 1.0, 1.0, None, None, None);

    store.apply_metric(1, 60_000, Metric::Speed, 10.0);

    let (state, history) = store.snapshot(1);
    assert!(!history.has_samples(Metric::OutsideTemp));
    assert!(history.path().is_empty());
    // Pruning only drops history; latest values survive
    assert_eq!(state.climate.unwrap().outside_c, Some(9.0));
}

#[test]
fn test_route_replaced_wholesale() {
    let store = store();
    store.apply_route(
        1,
        1_000,
        Route {
            dest: Some(Coordinates { lat: 50.0, lon: 4.0 }),
            eta_min: 30.0,
            dist_km: 25.0,
            dest_label: "Office".to_string(),
            traffic_delay_min: 5.0,
        },
    );

    let delta = store.apply_route(
        1,
        2_000,
        Route {
            dest: None,
            eta_min: 0.0,
            dist_km: 0.0,
            dest_label: String::new(),
            traffic_delay_min: 0.0,
        },
    );

    let route = delta.route.unwrap();
    assert_eq!(route.dest, None);
    assert!(route.dest_label.is_empty());
    assert!(delta.history.is_empty());
    assert!(delta.path.is_none());
}

#[test]
fn test_metadata_updates_are_silent() {
    let store = store();
    store.apply_metric(5, 1_000, Metric::Speed, 12.0);

    store.set_metadata_silently(5, 2_000, MetadataField::DisplayName, "Roadrunner".to_string());
    store.set_metadata_silently(5, 2_000, MetadataField::Model, "3".to_string());
    store.set_metadata_silently(9, 2_000, MetadataField::ExteriorColor, "Red".to_string());

    let (state, history) = store.snapshot(5);
    assert_eq!(state.display_name.as_deref(), Some("Roadrunner"));
    assert_eq!(state.model.as_deref(), Some("3"));
    assert_eq!(history.samples(Metric::Speed).len(), 1);

    let cars = store.list_cars();
    assert_eq!(
        cars,
        vec![
            CarSummary { id: 5, display_name: "Roadrunner".to_string() },
            CarSummary { id: 9, display_name: "Car 9".to_string() },
        ]
    );
}

#[test]
fn test_snapshot_creates_unknown_car() {
    let store = store();
    assert!(store.is_empty());

    let (state, history) = store.snapshot(42);

    assert_eq!(state, CarState::default());
    assert!(history.path().is_empty());
    assert_eq!(store.list_car_ids(), vec![42]);
    assert!(store.current_state(43).is_none());
}

#[test]
fn test_snapshot_payload_lists_every_series() {
    let store = store();
    store.apply_metric(1, 1_000, Metric::Heading, 90.0);

    let (state, history) = store.snapshot(1);
    let json = serde_json::to_value(SnapshotPayload::new(state, &history)).unwrap();

    let series = json["history_30s"].as_object().unwrap();
    assert_eq!(series.len(), Metric::ALL.len());
    assert_eq!(series["heading"], json!([{"ts_ms": 1000, "v": 90.0}]));
    assert_eq!(series["tpms_rr"], json!([]));
    assert_eq!(json["path_30s"], json!([]));
    assert!(json.get("battery").is_none());
}

#[test]
fn test_concurrent_updates_different_cars() {
    let store = Arc::new(store());
    let mut handles = vec![];

    for i in 0..10 {
        let store_clone = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for ts in 0..100 {
                store_clone.apply_metric(i, ts, Metric::Power, ts as f64);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 10);
    for i in 0..10 {
        let (_, history) = store.snapshot(i);
        assert_eq!(history.samples(Metric::Power).len(), 100);
    }
}

#[test]
fn test_snapshot_never_sees_partial_location() {
    let store = Arc::new(store());
    store.apply_location(1, 0, 0.0, 0.0, Some(0.0), None, None);

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..2_000 {
                let v = i as f64;
                store.apply_location(1, i, v, v, Some(v), None, None);
            }
        })
    };

    for _ in 0..2_000 {
        let (state, history) = store.snapshot(1);
        let location = state.location.unwrap();
        assert_eq!(location.lat, location.lon);
        assert_eq!(location.lat, location.speed_kph);
        let last = history.path().last().copied().unwrap();
        assert_eq!(Some(last.lat), location.lat);
        assert_eq!(last.ts_ms, state.ts_ms);
    }
    writer.join().unwrap();
}

#[test]
fn test_merge_combines_history_and_keeps_latest_ts() {
    let store = store();
    let delta1 = store.apply_metric(1, 1_000, Metric::Speed, 50.0);
    let delta2 = store.apply_metric(1, 2_000, Metric::BatteryLevel, 75.0);
    let delta3 = store.apply_metric(1, 1_500, Metric::InsideTemp, 22.0);

    let merged = merge_deltas(vec![delta1, delta2, delta3]).unwrap();

    assert_eq!(merged.ts_ms, 2_000);
    assert!(merged.location.is_some());
    assert!(merged.battery.is_some());
    assert!(merged.climate.is_some());
    assert!(merged.history.contains_key(&Metric::Speed));
    assert!(merged.history.contains_key(&Metric::BatteryLevel));
    assert!(merged.history.contains_key(&Metric::InsideTemp));
}

#[test]
fn test_merge_later_section_wins() {
    let mut first = Delta::new(1_000);
    first.battery = Some(Battery { soc_pct: Some(50.0), power_w: None });
    let mut second = Delta::new(900);
    second.battery = Some(Battery { soc_pct: Some(49.0), power_w: Some(10.0) });

    first.merge(second);

    assert_eq!(first.ts_ms, 1_000);
    assert_eq!(first.battery.unwrap().soc_pct, Some(49.0));
}

#[test]
fn test_merge_of_nothing() {
    assert!(merge_deltas(Vec::new()).is_none());
    assert!(merge_deltas(vec![Delta::new(5), Delta::new(6)]).is_none());
    assert!(Delta::new(5).is_empty());
}

#[test]
fn test_resample_only_observed_metrics() {
    let store = store();
    store.apply_metric(1, 1_000, Metric::BatteryLevel, 70.0);

    let merged = merge_deltas(store.resample(1, 6_000)).unwrap();

    assert_eq!(merged.ts_ms, 6_000);
    assert_eq!(merged.history.len(), 1);
    assert_eq!(
        merged.history[&Metric::BatteryLevel],
        vec![Sample { ts_ms: 1_000, v: 70.0 }, Sample { ts_ms: 6_000, v: 70.0 }]
    );
    // No position known, so no breadcrumb or synthetic speed
    assert!(merged.location.is_none());
    assert!(merged.path.is_none());
    assert!(merged.battery.unwrap().power_w.is_none());
}

#[test]
fn test_resample_position_without_speed_history() {
    let store = store();
    store.apply_location(1, 1_000, 10.0, 20.0, None, None, None);
    store.apply_route(1, 1_000, Route::default());

    let merged = merge_deltas(store.resample(1, 6_000)).unwrap();

    assert_eq!(merged.path.as_ref().unwrap().len(), 2);
    assert!(merged.history.is_empty());
    assert!(merged.route.is_none());
    let (state, _) = store.snapshot(1);
    assert_eq!(state.ts_ms, 6_000);
}

#[test]
fn test_resample_speed_without_position_skips_path() {
    let store = store();
    store.apply_metric(1, 1_000, Metric::Speed, 30.0);

    let merged = merge_deltas(store.resample(1, 6_000)).unwrap();

    assert!(merged.path.is_none());
    assert_eq!(merged.history[&Metric::Speed].len(), 2);
}

#[test]
fn test_resample_unknown_car() {
    let store = store();
    assert!(store.resample(99, 1_000).is_empty());
    // Resampling never creates cars
    assert!(store.is_empty());
}

#[test]
fn test_resample_never_stamps_before_last_update() {
    let store = store();
    store.apply_metric(1, 10_000, Metric::Speed, 5.0);

    // Clock read before a newer update landed
    let merged = merge_deltas(store.resample(1, 9_000)).unwrap();
    assert_eq!(merged.ts_ms, 10_000);
    assert_eq!(store.current_state(1).unwrap().ts_ms, 10_000);

    store.apply_metric(1, 39_500, Metric::Speed, 6.0);
    let (_, history) = store.snapshot(1);
    let series: Vec<i64> = history.samples(Metric::Speed).iter().map(|s| s.ts_ms).collect();
    assert_eq!(series, vec![10_000, 10_000, 39_500]);

    // Cutoff 10_500 drops both early samples
    store.apply_metric(1, 40_500, Metric::Speed, 7.0);
    let (_, history) = store.snapshot(1);
    let series: Vec<i64> = history.samples(Metric::Speed).iter().map(|s| s.ts_ms).collect();
    assert_eq!(series, vec![39_500, 40_500]);
}

#[test]
fn test_resample_once_broadcasts_one_merged_delta_per_car() {
    let store = store();
    let hub = Hub::new();
    store.apply_metric(1, 1_000, Metric::Speed, 30.0);
    store.apply_metric(1, 1_000, Metric::OutsideTemp, 12.0);
    store.apply_metric(2, 1_000, Metric::Power, 100.0);
    let (_, _) = store.snapshot(3);

    let mut sub1 = hub.subscribe(1);
    let mut sub3 = hub.subscribe(3);

    let broadcasts = resample_once(&store, &hub, 5_000);

    assert_eq!(broadcasts, 2);
    let frame = sub1.try_recv().unwrap();
    assert_eq!(frame.kind(), FrameKind::Delta);
    assert!(sub1.try_recv().is_none());
    let json: Value = serde_json::from_str(frame.data()).unwrap();
    assert_eq!(json["ts_ms"], json!(5000));
    assert!(json["history_30s"].get("speed_kph").is_some());
    assert!(json["history_30s"].get("outside_c").is_some());
    // Car 3 has nothing observed
    assert!(sub3.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resampler_ticks_until_shutdown() {
    let store = Arc::new(store());
    let hub = Arc::new(Hub::new());
    store.apply_metric(1, 1_000, Metric::Speed, 30.0);
    store.apply_metric(1, 1_000, Metric::OutsideTemp, 12.0);
    let mut sub = hub.subscribe(1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_resampler(
        Arc::clone(&store),
        Arc::clone(&hub),
        Duration::from_secs(5),
        shutdown_rx,
    ));

    for _ in 0..2 {
        let frame = sub.recv().await.unwrap();
        assert_eq!(frame.kind(), FrameKind::Delta);
        let json: Value = serde_json::from_str(frame.data()).unwrap();
        assert!(json["history_30s"].get("speed_kph").is_some());
        assert!(json["history_30s"].get("outside_c").is_some());
        // One merged delta per tick
        assert!(sub.try_recv().is_none());
    }

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(60), task)
        .await
        .expect("resampler kept running after shutdown")
        .unwrap();
    assert!(sub.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resampler_zero_interval_disabled() {
    let store = Arc::new(store());
    let hub = Arc::new(Hub::new());
    store.apply_metric(1, 1_000, Metric::Speed, 30.0);
    let mut sub = hub.subscribe(1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    timeout(
        Duration::from_secs(60),
        run_resampler(Arc::clone(&store), Arc::clone(&hub), Duration::ZERO, shutdown_rx),
    )
    .await
    .expect("zero interval should return immediately");
    assert!(sub.try_recv().is_none());
}
