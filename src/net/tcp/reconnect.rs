use std::time::Duration;

/// How long a [`TcpClient`](super::TcpClient) waits between failed connect
/// sequences.
///
/// Delays grow geometrically from `initial_delay` up to `max_delay` and reset
/// after every successful connect. Retries are unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            ..Self::default()
        }
    }

    /// Retry right away after every failure, without any delay.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1,
        }
    }
}

/// Running backoff state for one client.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    current_delay: Duration,
    failure_count: u32,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_delay: policy.initial_delay,
            failure_count: 0,
        }
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.failure_count = self.failure_count.saturating_add(1);
        self.current_delay = self
            .current_delay
            .saturating_mul(self.policy.multiplier.max(1))
            .min(self.policy.max_delay);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current_delay = self.policy.initial_delay;
        self.failure_count = 0;
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failure_count
    }
}
