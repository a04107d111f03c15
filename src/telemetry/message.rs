use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::telemetry::sensor::SensorReading;

/// Availability announced on a device's status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => f.write_str("online"),
            DeviceStatus::Offline => f.write_str("offline"),
        }
    }
}

/// Payload published on `{root}/{store}/{device}/data`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryMessage {
    #[serde(flatten)]
    pub reading: SensorReading,
    /// Capture time, unix seconds
    pub timestamp: i64,
    pub source: String,
    pub gateway_ip: String,
}

impl TelemetryMessage {
    /// Stamp a reading with the current time
    pub fn new(reading: SensorReading, source: &str, gateway_ip: &str) -> Self {
        Self::captured_at(reading, Utc::now(), source, gateway_ip)
    }

    pub fn captured_at(
        reading: SensorReading,
        at: DateTime<Utc>,
        source: &str,
        gateway_ip: &str,
    ) -> Self {
        Self {
            reading,
            timestamp: at.timestamp(),
            source: source.to_string(),
            gateway_ip: gateway_ip.to_string(),
        }
    }
}

/// Payload published on `{root}/{store}/{device}/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: DeviceStatus,
    pub ip: String,
}

impl StatusMessage {
    pub fn new(status: DeviceStatus, ip: &str) -> Self {
        Self {
            status,
            ip: ip.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::sensor::Metric;
    use chrono::TimeZone;

    #[test]
    fn test_telemetry_payload_shape() {
        let reading = Metric::ALL
            .iter()
            .fold(SensorReading::new(), |r, m| r.with(*m, 1.5));
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let msg = TelemetryMessage::captured_at(reading, at, "Siemens2050", "192.168.1.100");

        let json = serde_json::to_value(&msg).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 10);
        for metric in Metric::ALL {
            assert_eq!(obj[metric.name()], 1.5);
        }
        assert_eq!(obj["timestamp"], 1_700_000_000i64);
        assert_eq!(obj["source"], "Siemens2050");
        assert_eq!(obj["gateway_ip"], "192.168.1.100");
    }

    #[test]
    fn test_timestamp_is_integer_seconds() {
        let before = Utc::now().timestamp();
        let msg = TelemetryMessage::new(SensorReading::new(), "s", "ip");
        let text = serde_json::to_string(&msg).unwrap();
        assert!(msg.timestamp >= before);
        assert!(!text.contains("\"timestamp\":\"")); // number, not string
        assert!(!text.contains(&format!("{}.", msg.timestamp)));
    }

    #[test]
    fn test_status_payload() {
        let msg = StatusMessage::new(DeviceStatus::Online, "10.0.0.5");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"status":"online","ip":"10.0.0.5"}"#
        );

        let parsed: StatusMessage =
            serde_json::from_str(r#"{"status":"offline","ip":"10.0.0.5"}"#).unwrap();
        assert_eq!(parsed.status, DeviceStatus::Offline);
        assert_eq!(DeviceStatus::Offline.to_string(), "offline");
    }
}
