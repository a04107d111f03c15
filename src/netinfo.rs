use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, warn};

use crate::config::Config;

pub const FALLBACK_GATEWAY_IP: &str = "127.0.0.1";

/// Address reported as `gateway_ip`/`ip` in payloads.
///
/// Uses the configured value when present, otherwise the local address the
/// OS would use to reach the broker.
pub fn resolve_gateway_ip(config: &Config) -> String {
    if let Some(ip) = &config.gateway.gateway_ip {
        return ip.clone();
    }

    match detect_local_ip(&config.mqtt.host, config.mqtt.port) {
        Some(ip) => {
            debug!("Detected gateway address {} via route to broker", ip);
            ip.to_string()
        }
        None => {
            warn!(
                "Could not detect gateway address, reporting {}",
                FALLBACK_GATEWAY_IP
            );
            FALLBACK_GATEWAY_IP.to_string()
        }
    }
}

/// Local address of a UDP socket connected to the broker. Connecting a UDP
/// socket only selects a route; nothing is sent.
pub fn detect_local_ip(host: &str, port: u16) -> Option<IpAddr> {
    let target = (host, port).to_socket_addrs().ok()?.next()?;
    let bind: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
