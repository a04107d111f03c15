use rumqttc::QoS;
use serde::Serialize;
use tracing::{debug, error};

use crate::mqtt::transport::{Transport, TransportError};

/// Counts of publish submissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub accepted: u64,
    pub rejected: u64,
}

impl PublishStats {
    pub fn record(&mut self, accepted: bool) {
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.accepted + self.rejected
    }
}

/// Serializes messages to JSON and hands them to the transport.
///
/// There is no retry: a rejected submission is logged and reported as `false`.
pub struct Publisher<T> {
    transport: T,
    qos: QoS,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T, qos: QoS) -> Self {
        Self { transport, qos }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Returns whether the transport accepted the request, not whether the broker got it
    pub fn publish<M: Serialize>(&self, topic: &str, message: &M) -> bool {
        match self.try_publish(topic, message) {
            Ok(()) => true,
            Err(e) => {
                error!("Publish to {} failed: {}", topic, e);
                false
            }
        }
    }

    fn try_publish<M: Serialize>(&self, topic: &str, message: &M) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(message)?;
        debug!(
            "Submitting {} bytes to {}: {}",
            payload.len(),
            topic,
            String::from_utf8_lossy(&payload)
        );
        self.transport.submit(topic, self.qos, payload)
    }
}
