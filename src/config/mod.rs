use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete carcast configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarcastConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub resampler: ResamplerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub shares: SharesConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_addr")]
    pub addr: String,
    /// Origins allowed by CORS; empty allows any origin
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    /// Bearer token required on admin routes; admin routes are open when unset
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
            cors_allowed_origins: Vec::new(),
            admin_token: None,
        }
    }
}

/// Upstream MQTT broker. Ingestion is disabled when `broker_url` is unset.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Cars to subscribe to; empty subscribes to every car under the prefix
    #[serde(default)]
    pub car_ids: Vec<i64>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "teslamate/cars".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            port: default_mqtt_port(),
            username: None,
            password: None,
            topic_prefix: default_topic_prefix(),
            car_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Sliding history window per metric (seconds)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_window_seconds() -> u64 {
    900
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
        }
    }
}

impl StateConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResamplerConfig {
    /// How often to re-emit latest values (seconds, 0 disables)
    #[serde(default = "default_resample_interval")]
    pub interval_seconds: u64,
}

fn default_resample_interval() -> u64 {
    5
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_resample_interval(),
        }
    }
}

impl ResamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Streaming session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
    /// Per-subscriber queue depth before frames are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Arrival radius used when a share does not set one (meters)
    #[serde(default = "default_arrive_radius")]
    pub default_arrive_radius_m: f64,
}

fn default_heartbeat_seconds() -> u64 {
    15
}

fn default_queue_capacity() -> usize {
    crate::stream::DEFAULT_QUEUE_CAPACITY
}

fn default_arrive_radius() -> f64 {
    100.0
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: default_heartbeat_seconds(),
            queue_capacity: default_queue_capacity(),
            default_arrive_radius_m: default_arrive_radius(),
        }
    }
}

impl StreamConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharesConfig {
    /// Lifetime of a share link when the request gives no expiry (seconds)
    #[serde(default = "default_share_ttl")]
    pub default_ttl_seconds: u64,
}

fn default_share_ttl() -> u64 {
    8 * 60 * 60
}

impl Default for SharesConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_share_ttl(),
        }
    }
}

impl SharesConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

impl CarcastConfig {
    /// Apply `CARCAST_*` environment variables on top of the loaded values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("CARCAST_HTTP_ADDR") {
            self.http.addr = v;
        }
        if let Some(v) = non_empty("CARCAST_ADMIN_TOKEN") {
            self.http.admin_token = Some(v);
        }
        if let Some(v) = non_empty("CARCAST_MQTT_BROKER_URL") {
            self.mqtt.broker_url = Some(v);
        }
        if let Some(v) = non_empty("CARCAST_MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = lookup("CARCAST_MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        let heartbeat = non_empty("CARCAST_HEARTBEAT_SECONDS").and_then(|v| v.parse::<u64>().ok());
        if let Some(n) = heartbeat {
            self.stream.heartbeat_seconds = n;
        }
        if let Some(r) = non_empty("CARCAST_ARRIVE_RADIUS_M").and_then(|v| v.parse::<f64>().ok()) {
            self.stream.default_arrive_radius_m = r;
        }
        if let Some(n) = non_empty("CARCAST_WINDOW_SECONDS").and_then(|v| v.parse::<u64>().ok()) {
            self.state.window_seconds = n;
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<CarcastConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: CarcastConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load from `CARCAST_CONFIG` if set (defaults otherwise), then apply env overrides
pub fn load_from_env() -> anyhow::Result<CarcastConfig> {
    let mut config = match std::env::var("CARCAST_CONFIG") {
        Ok(path) if !path.trim().is_empty() => load_config(path)?,
        _ => CarcastConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}
