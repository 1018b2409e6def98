use crate::config::MqttConfig;
use crate::ingest::Ingestor;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const MAX_BACKOFF_SECS: u64 = 30;
const REQUEST_CAPACITY: usize = 64;

/// Topic filters for the configured cars, or a single-level wildcard for all cars
pub fn subscription_filters(config: &MqttConfig) -> Vec<String> {
    let prefix = config.topic_prefix.trim_end_matches('/');
    if config.car_ids.is_empty() {
        return vec![format!("{}/+/+", prefix)];
    }
    config
        .car_ids
        .iter()
        .map(|id| format!("{}/{}/+", prefix, id))
        .collect()
}

/// Host and port from a broker URL such as `tcp://host:1883`, `mqtt://host` or `host`
pub fn broker_address(url: &str, default_port: u16) -> Option<(String, u16)> {
    let rest = url
        .trim()
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url.trim());
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().ok()?;
            Some((host.to_string(), port))
        }
        Some(_) => None,
        None => Some((authority.to_string(), default_port)),
    }
}

fn backoff(consecutive_errors: u32) -> Duration {
    // 1s, 2s, 4s, ... capped
    let secs = (1u64 << consecutive_errors.saturating_sub(1).min(5)).min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Consume the broker until `shutdown` flips to `true`.
///
/// Every publish is stamped with wall-clock milliseconds on arrival and handed to
/// the ingestor. Connection errors are retried with capped exponential backoff;
/// subscriptions are renewed on every (re)connect.
pub async fn run_mqtt_ingest(
    config: MqttConfig,
    ingestor: Arc<Ingestor>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let url = config
        .broker_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("MQTT broker URL not configured"))?;
    let (host, port) = broker_address(url, config.port)
        .ok_or_else(|| anyhow::anyhow!("Invalid MQTT broker URL: {}", url))?;

    let client_id = format!("carcast-{:08x}", rand::random::<u32>());
    let mut options = MqttOptions::new(client_id.clone(), host.clone(), port);
    options.set_keep_alive(KEEP_ALIVE);
    if let Some(user) = &config.username {
        options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let filters = subscription_filters(&config);
    info!(host = %host, port = port, client_id = %client_id, "MQTT ingestion starting");

    let mut consecutive_errors: u32 = 0;
    loop {
        let event = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                consecutive_errors = 0;
                let ts_ms = Utc::now().timestamp_millis();
                let applied = ingestor.handle_message(
                    &config.topic_prefix,
                    &publish.topic,
                    &publish.payload,
                    ts_ms,
                );
                match applied {
                    Ok(delivered) => {
                        debug!(topic = %publish.topic, delivered = delivered, "Applied telemetry")
                    }
                    Err(e) => {
                        warn!(topic = %publish.topic, error = %e, "Dropping malformed message")
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                consecutive_errors = 0;
                info!(host = %host, "MQTT connected");
                for filter in &filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        warn!(filter = %filter, error = %e, "MQTT subscribe failed");
                    } else {
                        info!(filter = %filter, "MQTT subscribed");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let wait = backoff(consecutive_errors);
                warn!(
                    error = %e,
                    attempt = consecutive_errors,
                    retry_in_secs = wait.as_secs(),
                    "MQTT connection error"
                );
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    let _ = client.try_disconnect();
    info!("MQTT ingestion stopped");
    Ok(())
}
