use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::MqttConfig;
use crate::mqtt::resilience::{HealthSnapshot, LinkHealth, ReconnectPolicy};
use crate::mqtt::transport::{ConnectionState, Transport, TransportError};

/// rumqttc client whose event loop runs on its own tokio task
pub struct MqttClient {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    health: Arc<RwLock<LinkHealth>>,
    closing: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Create the client and start its event loop. Must be called inside a tokio runtime.
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        Self::connect_with_policy(config, ReconnectPolicy::from_config(config))
    }

    pub fn connect_with_policy(config: &MqttConfig, policy: ReconnectPolicy) -> Result<Self> {
        let client_id = Self::generate_client_id(&config.client_id, config.unique_client_id);
        info!(
            "Connecting to {}:{} with client_id: {}",
            config.host, config.port, client_id
        );

        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(config.clean_session);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.get_password());
        }
        options.set_inflight(100);

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);

        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let health = Arc::new(RwLock::new(LinkHealth::new(policy)));
        let closing = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(drive_event_loop(
            eventloop,
            state_tx,
            Arc::clone(&health),
            Arc::clone(&closing),
        ));

        Ok(Self {
            client,
            state,
            health,
            closing,
            event_loop: Mutex::new(Some(task)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn health(&self) -> HealthSnapshot {
        self.health.read().await.snapshot()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.health.read().await.last_error().map(|s| s.to_string())
    }

    /// Wait for the event loop to finish flushing, aborting it after `timeout`
    pub async fn close(&self, timeout: Duration) {
        self.closing.store(true, Ordering::SeqCst);

        let Some(mut task) = self.event_loop.lock().await.take() else {
            return;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => debug!("MQTT event loop stopped"),
            Ok(Err(e)) => warn!("MQTT event loop ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "MQTT event loop still running after {:?}, aborting it",
                    timeout
                );
                task.abort();
            }
        }
    }

    /// Use the configured id as-is, or append a millisecond suffix when `unique` is set
    fn generate_client_id(configured_id: &str, unique: bool) -> String {
        if !unique {
            return configured_id.to_string();
        }

        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() % 100000)
            .unwrap_or(0);

        format!("{}-{}", configured_id, suffix)
    }
}

impl Transport for MqttClient {
    fn submit(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        self.client
            .try_disconnect()
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    state: watch::Sender<ConnectionState>,
    health: Arc<RwLock<LinkHealth>>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                info!("Connected to MQTT broker: {:?}", connack);
                health.write().await.connected();
                state.send_replace(ConnectionState::Connected);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("Publish acknowledged (pkid: {})", ack.pkid);
            }
            Ok(Event::Incoming(Packet::PingResp)) => {
                trace!("Ping response received");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnect sent to broker");
                state.send_replace(ConnectionState::Disconnected);
                break;
            }
            Ok(other) => {
                trace!("MQTT event: {:?}", other);
            }
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    debug!("MQTT event loop stopping after disconnect request: {}", e);
                    state.send_replace(ConnectionState::Disconnected);
                    break;
                }

                error!("MQTT connection error: {}", e);
                state.send_replace(ConnectionState::Reconnecting);

                let (delay, counters) = {
                    let mut health = health.write().await;
                    (health.failed(e.to_string()), health.snapshot())
                };
                let Some(delay) = delay else {
                    error!(
                        "Giving up after {} failed connection attempts",
                        counters.consecutive_failures
                    );
                    state.send_replace(ConnectionState::Disconnected);
                    break;
                };

                warn!(
                    "Reconnecting in {:?} (attempt {}, reconnects so far: {})",
                    delay, counters.consecutive_failures, counters.reconnects
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Control packet types (upper nibble of the fixed header) in `bytes`
    fn packet_types(bytes: &[u8]) -> Vec<u8> {
        let mut types = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            types.push(bytes[pos] >> 4);
            pos += 1;
            let mut remaining = 0usize;
            let mut shift = 0;
            while pos < bytes.len() {
                let byte = bytes[pos];
                pos += 1;
                remaining |= ((byte & 0x7f) as usize) << shift;
                shift += 7;
                if byte & 0x80 == 0 {
                    break;
                }
            }
            pos += remaining;
        }
        types
    }

    /// Accepts one client, answers CONNECT with a ConnAck and records everything until EOF
    async fn fake_broker(listener: TcpListener) -> Vec<u8> {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        let mut acked = false;
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            if !acked {
                socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                acked = true;
            }
        }
        received
    }

    #[test]
    fn test_packet_types() {
        // CONNACK, then PUBLISH with a two-byte body, then DISCONNECT
        let bytes = [0x20, 0x02, 0x00, 0x00, 0x30, 0x02, 0xaa, 0xbb, 0xe0, 0x00];
        assert_eq!(packet_types(&bytes), vec![2, 3, 14]);
    }

    #[tokio::test]
    async fn test_connack_publish_and_prompt_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(fake_broker(listener));

        let mut config = MqttConfig::default();
        config.host = "127.0.0.1".into();
        config.port = port;
        let client = MqttClient::connect(&config).unwrap();

        let mut connection = client.connection();
        tokio::time::timeout(
            Duration::from_secs(5),
            connection.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .expect("no ConnAck within 5s")
        .unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.health().await.connections, 1);

        client
            .submit("aquatech/T/equipo_001/data", QoS::AtMostOnce, b"{}".to_vec())
            .unwrap();
        client.disconnect().unwrap();

        let started = std::time::Instant::now();
        client.close(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let received = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker never saw the connection close")
            .unwrap();
        // CONNECT, PUBLISH, DISCONNECT
        assert_eq!(packet_types(&received), vec![1, 3, 14]);
    }

    #[test]
    fn test_exact_client_id() {
        assert_eq!(
            MqttClient::generate_client_id("siemens2050_gateway", false),
            "siemens2050_gateway"
        );
    }

    #[test]
    fn test_unique_client_id_has_suffix() {
        let id = MqttClient::generate_client_id("gw", true);
        let suffix = id.strip_prefix("gw-").unwrap();
        assert!(suffix.parse::<u64>().is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_broker_rejects_once_queue_is_full() {
        let mut config = MqttConfig::default();
        // Nothing listens on port 1 of the loopback interface
        config.host = "127.0.0.1".into();
        config.port = 1;
        config.request_capacity = 2;
        let policy = ReconnectPolicy::fixed(Duration::from_secs(30), Duration::from_secs(30));
        let client = MqttClient::connect_with_policy(&config, policy).unwrap();

        let accepted = (0..10)
            .filter(|_| {
                client
                    .submit("aquatech/T/e/data", QoS::AtLeastOnce, b"{}".to_vec())
                    .is_ok()
            })
            .count();
        assert!(accepted < 10, "bounded queue must reject eventually");
        assert_ne!(client.state(), ConnectionState::Connected);

        client.close(Duration::from_millis(200)).await;
    }
}
