use rumqttc::QoS;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Connection state as seen from the broker side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The client did not accept the request (queue full or event loop gone)
    #[error("request rejected by MQTT client: {0}")]
    Rejected(String),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outbound side of the message bus.
///
/// Submissions are non-blocking: `Ok` means the request was queued for the
/// network, not that the broker acknowledged it.
pub trait Transport: Send + Sync {
    fn submit(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Watch the connection state reported by the network task
    fn connection(&self) -> watch::Receiver<ConnectionState>;

    /// Queue a disconnect behind any pending publishes
    fn disconnect(&self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn submit(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError> {
        (**self).submit(topic, qos, payload)
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        (**self).connection()
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        (**self).disconnect()
    }
}

/// Map a configured QoS level to rumqttc's enum; anything unknown means at-least-once
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
