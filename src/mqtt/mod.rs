pub mod client;
pub mod publisher;
pub mod resilience;
pub mod transport;

pub use client::MqttClient;
pub use publisher::{PublishStats, Publisher};
pub use transport::{qos_from_level, ConnectionState, Transport, TransportError};
