pub mod message;
pub mod sensor;
pub mod topic;

pub use message::{DeviceStatus, StatusMessage, TelemetryMessage};
pub use sensor::{Metric, SensorReading, SensorSource, SimulatedSensors};
pub use topic::{TopicKind, TopicScheme};
