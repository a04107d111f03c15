//! Periodic telemetry publishing and the online/offline status lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! `online` is announced for every device once the broker acknowledges the
//! connection (or `connect_timeout` passes). A shutdown request while
//! connected announces `offline` before the disconnect; a shutdown request
//! while still connecting skips the announcements.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::mqtt::{ConnectionState, PublishStats, Publisher, Transport};
use crate::telemetry::{DeviceStatus, SensorSource, StatusMessage, TelemetryMessage, TopicScheme};

/// Lifecycle phase of the gateway loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// What happened during a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Completed passes over the device list
    pub cycles: u64,
    pub telemetry: PublishStats,
    pub status: PublishStats,
    /// Whether the broker acknowledged the connection before publishing started
    pub acknowledged: bool,
}

/// Why a pause ended early or the loop stopped
enum Stop {
    Shutdown,
    CycleLimit,
}

pub struct Gateway<T, S> {
    config: Arc<GatewayConfig>,
    topics: TopicScheme,
    gateway_ip: String,
    publisher: Publisher<T>,
    sensors: S,
    phase: Phase,
    summary: RunSummary,
}

impl<T: Transport, S: SensorSource> Gateway<T, S> {
    pub fn new(
        config: GatewayConfig,
        gateway_ip: impl Into<String>,
        publisher: Publisher<T>,
        sensors: S,
    ) -> Self {
        let topics = TopicScheme::new(&config.topic_root, &config.store_code);
        Self {
            config: Arc::new(config),
            topics,
            gateway_ip: gateway_ip.into(),
            publisher,
            sensors,
            phase: Phase::Disconnected,
            summary: RunSummary::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run until `shutdown` resolves or `max_cycles` passes complete.
    ///
    /// Every pause races `shutdown`, so a stop request is acted on immediately.
    pub async fn run<F>(&mut self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.summary = RunSummary::default();

        info!(
            "Publishing under {}/{}/<device> at {:?}",
            self.topics.root(),
            self.topics.store_code(),
            self.publisher.qos()
        );
        self.set_phase(Phase::Connecting);
        let mut connection = self.publisher.transport().connection();
        let timeout = self.config.connect_timeout();
        let acknowledged = tokio::select! {
            biased;
            _ = shutdown.as_mut() => None,
            acked = wait_until_connected(&mut connection, timeout) => Some(acked),
        };

        match acknowledged {
            None => {
                info!("Shutdown requested while connecting, skipping status announcements");
                self.set_phase(Phase::Disconnecting);
                self.disconnect();
                self.set_phase(Phase::Disconnected);
                return self.summary.clone();
            }
            Some(true) => info!("Broker connection acknowledged"),
            Some(false) => warn!(
                "No connection acknowledgement within {:?}, publishing anyway",
                timeout
            ),
        }
        self.summary.acknowledged = acknowledged == Some(true);

        self.set_phase(Phase::Connected);
        info!("Publishing initial status...");
        self.announce(DeviceStatus::Online);

        let settled = self
            .pause(self.config.post_online_pause(), shutdown.as_mut())
            .await;
        let stop = match settled {
            Err(stop) => stop,
            Ok(()) => self.publish_cycles(shutdown.as_mut()).await,
        };
        match stop {
            Stop::Shutdown => info!("Shutdown requested, closing..."),
            Stop::CycleLimit => info!(
                "Completed {} cycles, closing...",
                self.summary.cycles
            ),
        }

        self.set_phase(Phase::Disconnecting);
        info!("Publishing offline status...");
        self.announce(DeviceStatus::Offline);
        tokio::time::sleep(self.config.shutdown_grace()).await;
        self.disconnect();
        self.set_phase(Phase::Disconnected);

        self.summary.clone()
    }

    async fn publish_cycles<F>(&mut self, mut shutdown: Pin<&mut F>) -> Stop
    where
        F: Future<Output = ()>,
    {
        info!(
            "Publishing telemetry every {} seconds...",
            self.config.publish_interval_secs
        );

        loop {
            if let Err(stop) = self.publish_cycle(shutdown.as_mut()).await {
                return stop;
            }
            self.summary.cycles += 1;
            debug!("Cycle {} complete", self.summary.cycles);

            if let Some(max) = self.config.max_cycles {
                if self.summary.cycles >= max {
                    return Stop::CycleLimit;
                }
            }

            if let Err(stop) = self
                .pause(self.config.publish_interval(), shutdown.as_mut())
                .await
            {
                return stop;
            }
        }
    }

    /// One pass over the devices in configured order
    async fn publish_cycle<F>(&mut self, mut shutdown: Pin<&mut F>) -> Result<(), Stop>
    where
        F: Future<Output = ()>,
    {
        let config = Arc::clone(&self.config);
        for device in &config.devices {
            let reading = self.sensors.read(device);
            debug!("[{}] Read {}", device, reading);
            let message = TelemetryMessage::new(reading, &config.source, &self.gateway_ip);
            let topic = self.topics.data(device);

            let accepted = self.publisher.publish(&topic, &message);
            if accepted {
                info!("[{}] Published to {}", device, topic);
            }
            self.summary.telemetry.record(accepted);

            self.pause(config.device_pause(), shutdown.as_mut()).await?;
        }
        Ok(())
    }

    fn announce(&mut self, status: DeviceStatus) {
        let config = Arc::clone(&self.config);
        let message = StatusMessage::new(status, &self.gateway_ip);
        for device in &config.devices {
            let topic = self.topics.status(device);
            let accepted = self.publisher.publish(&topic, &message);
            if accepted {
                info!("[{}] Status: {}", device, status);
            }
            self.summary.status.record(accepted);
        }
    }

    async fn pause<F>(&self, duration: Duration, shutdown: Pin<&mut F>) -> Result<(), Stop>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = shutdown => Err(Stop::Shutdown),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn disconnect(&self) {
        if let Err(e) = self.publisher.transport().disconnect() {
            warn!("Failed to request MQTT disconnect: {}", e);
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!("Gateway phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// True once the transport reports `Connected`, false on timeout or if the
/// network task is gone
async fn wait_until_connected(
    connection: &mut watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> bool {
    matches!(
        tokio::time::timeout(
            timeout,
            connection.wait_for(|state| *state == ConnectionState::Connected)
        )
        .await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_connected_sees_later_connack() {
        let (tx, mut rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send_replace(ConnectionState::Connected);
            // keep the sender alive past the wait
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        assert!(wait_until_connected(&mut rx, Duration::from_secs(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_connected_times_out() {
        let (_tx, mut rx) = watch::channel(ConnectionState::Reconnecting);
        assert!(!wait_until_connected(&mut rx, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_wait_until_connected_when_sender_gone() {
        let (tx, mut rx) = watch::channel(ConnectionState::Connecting);
        drop(tx);
        assert!(!wait_until_connected(&mut rx, Duration::from_secs(2)).await);
    }
}
