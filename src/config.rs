use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Append a timestamp suffix to `client_id` so restarts never collide
    #[serde(default)]
    pub unique_client_id: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// QoS level for every publish (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Outgoing requests buffered before publishes are rejected
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
    /// Give up after this many consecutive failures (unset = never)
    pub reconnect_max_attempts: Option<u32>,
}

/// Site, devices and publish schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_store_code")]
    pub store_code: String,
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
    /// Value of the `source` field in telemetry payloads
    #[serde(default = "default_source")]
    pub source: String,
    /// Address reported in payloads; detected from the broker route when unset
    pub gateway_ip: Option<String>,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    #[serde(default = "default_device_pause")]
    pub device_pause_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_post_online_pause")]
    pub post_online_pause_ms: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Stop gracefully after this many publish cycles
    pub max_cycles: Option<u64>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            unique_client_id: false,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            clean_session: default_clean_session(),
            qos: default_qos(),
            request_capacity: default_request_capacity(),
            reconnect_base_secs: default_reconnect_base(),
            reconnect_max_secs: default_reconnect_max(),
            reconnect_max_attempts: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_code: default_store_code(),
            devices: default_devices(),
            topic_root: default_topic_root(),
            source: default_source(),
            gateway_ip: None,
            publish_interval_secs: default_publish_interval(),
            device_pause_ms: default_device_pause(),
            connect_timeout_ms: default_connect_timeout(),
            post_online_pause_ms: default_post_online_pause(),
            shutdown_grace_ms: default_shutdown_grace(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_cycles: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "siemens2050_gateway".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_qos() -> u8 {
    1
}

fn default_request_capacity() -> usize {
    100
}

fn default_reconnect_base() -> u64 {
    5
}

fn default_reconnect_max() -> u64 {
    60
}

fn default_store_code() -> String {
    "CODIGO_TIENDA_001".to_string()
}

fn default_devices() -> Vec<String> {
    vec!["equipo_001".to_string(), "equipo_002".to_string()]
}

fn default_topic_root() -> String {
    "aquatech".to_string()
}

fn default_source() -> String {
    "Siemens2050".to_string()
}

fn default_publish_interval() -> u64 {
    5
}

fn default_device_pause() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_post_online_pause() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    1000
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Config {
    /// Get the default config directory path (~/.config/aquagate/)
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("aquagate")
    }

    /// Get the default config file path (~/.config/aquagate/config.toml)
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.toml")
    }

    /// Find config file using fallback chain:
    /// 1. If explicit path provided, use it
    /// 2. If ./config.toml exists in current directory, use it
    /// 3. Otherwise use ~/.config/aquagate/config.toml
    pub fn find_config_path(explicit_path: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit_path {
            return path.to_path_buf();
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return local_config;
        }

        Self::default_path()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }
        }

        let contents = self.to_toml()?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "Failed to serialize config")
    }

    pub fn validate(&self) -> Result<()> {
        let mqtt = &self.mqtt;
        if mqtt.host.trim().is_empty() {
            bail!("MQTT host cannot be empty");
        }
        if mqtt.client_id.trim().is_empty() {
            bail!("MQTT client_id cannot be empty");
        }
        if mqtt.qos > 2 {
            bail!("MQTT qos must be 0, 1 or 2 (got {})", mqtt.qos);
        }
        if mqtt.request_capacity == 0 {
            bail!("MQTT request_capacity must be at least 1");
        }
        if mqtt.reconnect_base_secs == 0 {
            bail!("MQTT reconnect_base_secs must be greater than zero");
        }
        if mqtt.reconnect_max_secs < mqtt.reconnect_base_secs {
            bail!(
                "MQTT reconnect_max_secs ({}) must not be below reconnect_base_secs ({})",
                mqtt.reconnect_max_secs,
                mqtt.reconnect_base_secs
            );
        }

        let gateway = &self.gateway;
        check_topic_segment("store_code", &gateway.store_code)?;
        check_topic_segment("topic_root", &gateway.topic_root)?;
        if gateway.devices.is_empty() {
            bail!("No devices configured");
        }

        let mut seen = HashSet::new();
        for device in &gateway.devices {
            check_topic_segment("device id", device)?;
            if !seen.insert(device.as_str()) {
                bail!("Duplicate device id: {}", device);
            }
        }

        if gateway.publish_interval_secs == 0 {
            bail!("publish_interval_secs must be greater than zero");
        }
        if gateway.max_cycles == Some(0) {
            bail!("max_cycles must be greater than zero when set");
        }
        Ok(())
    }
}

/// Store codes, device ids and the topic root each become exactly one topic level
fn check_topic_segment(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{} cannot be empty", what);
    }
    if value.contains(['/', '+', '#']) {
        bail!("{} '{}' must not contain '/', '+' or '#'", what, value);
    }
    Ok(())
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Password sent with the username, empty when only a username is configured
    pub fn get_password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

impl GatewayConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn device_pause(&self) -> Duration {
        Duration::from_millis(self.device_pause_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn post_online_pause(&self) -> Duration {
        Duration::from_millis(self.post_online_pause_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_gateway() {
        let config = Config::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "siemens2050_gateway");
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.gateway.store_code, "CODIGO_TIENDA_001");
        assert_eq!(config.gateway.devices, vec!["equipo_001", "equipo_002"]);
        assert_eq!(config.gateway.topic_root, "aquatech");
        assert_eq!(config.gateway.publish_interval(), Duration::from_secs(5));
        assert_eq!(config.gateway.device_pause(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
[mqtt]
host = "broker.local"

[gateway]
store_code = "T42"
devices = ["a", "b", "c"]
publish_interval_secs = 10
"#,
        )
        .unwrap();
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.gateway.store_code, "T42");
        assert_eq!(config.gateway.devices.len(), 3);
        assert_eq!(config.gateway.publish_interval_secs, 10);
        assert_eq!(config.gateway.source, "Siemens2050");
        assert!(config.gateway.gateway_ip.is_none());
    }

    #[test]
    fn test_rejects_wildcards_and_separators() {
        let mut config = Config::default();
        config.gateway.store_code = "T/1".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.devices = vec!["equipo+".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.topic_root = "#".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_device_lists() {
        let mut config = Config::default();
        config.gateway.devices.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.devices = vec!["a".into(), "a".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate device id"));

        let mut config = Config::default();
        config.gateway.devices = vec!["  ".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_mqtt_settings() {
        let mut config = Config::default();
        config.mqtt.qos = 3;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mqtt.client_id = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.publish_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_reconnect_delays() {
        let mut config = Config::default();
        config.mqtt.reconnect_base_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_base_secs"));

        let mut config = Config::default();
        config.mqtt.reconnect_base_secs = 30;
        config.mqtt.reconnect_max_secs = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mqtt.reconnect_base_secs = 10;
        config.mqtt.reconnect_max_secs = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_keeps_optional_fields() {
        let mut config = Config::default();
        config.gateway.gateway_ip = Some("192.168.1.100".into());
        config.mqtt.username = Some("gw".into());
        let text = config.to_toml().unwrap();
        assert_eq!(Config::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let path = Path::new("/tmp/custom.toml");
        assert_eq!(Config::find_config_path(Some(path)), path.to_path_buf());
    }
}
