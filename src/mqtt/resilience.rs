use rand::Rng;
use std::time::Duration;

use crate::config::MqttConfig;

/// Exponential delay schedule used by the network task between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    /// None = retry forever
    max_attempts: Option<u32>,
    /// Up to this fraction of the delay is added at random (0.0 to 1.0)
    jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(60),
            max_attempts: None,
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &MqttConfig) -> Self {
        Self {
            base: Duration::from_secs(config.reconnect_base_secs),
            cap: Duration::from_secs(config.reconnect_max_secs),
            max_attempts: config.reconnect_max_attempts,
            ..Self::default()
        }
    }

    /// Deterministic policy without jitter
    pub fn fixed(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            max_attempts: None,
            jitter: 0.0,
        }
    }

    pub fn jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Wait before attempt number `attempt` (1 = first retry); None means give up
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if matches!(self.max_attempts, Some(max) if attempt > max) {
            return None;
        }

        let doublings = attempt.saturating_sub(1).min(20);
        let delay = self.base.saturating_mul(1u32 << doublings).min(self.cap);

        let spread_ms = (delay.as_millis() as f64 * self.jitter) as u64;
        let extra = match spread_ms {
            0 => Duration::ZERO,
            ms => Duration::from_millis(rand::thread_rng().gen_range(0..=ms)),
        };
        Some(delay.saturating_add(extra).min(self.cap))
    }
}

/// Connection counters exposed outside the network task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub connections: u64,
    pub reconnects: u64,
    pub consecutive_failures: u32,
}

/// Connection bookkeeping owned by the network task
#[derive(Debug)]
pub struct LinkHealth {
    policy: ReconnectPolicy,
    counters: HealthSnapshot,
    last_error: Option<String>,
}

impl LinkHealth {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            counters: HealthSnapshot::default(),
            last_error: None,
        }
    }

    /// Broker acknowledged a connection
    pub fn connected(&mut self) {
        if self.counters.connections > 0 || self.counters.consecutive_failures > 0 {
            self.counters.reconnects += 1;
        }
        self.counters.connections += 1;
        self.counters.consecutive_failures = 0;
        self.last_error = None;
    }

    /// Record a failed poll; returns how long to wait before polling again,
    /// or None once the policy's attempts are used up
    pub fn failed(&mut self, error: String) -> Option<Duration> {
        self.counters.consecutive_failures += 1;
        self.last_error = Some(error);
        self.policy.delay(self.counters.consecutive_failures)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.counters
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
