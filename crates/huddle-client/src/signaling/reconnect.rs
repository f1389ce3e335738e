use std::time::Duration;

/// When to reconnect after the signaling socket drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Never reconnect
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Some(0))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// once the attempts are exhausted
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), None)
    }
}

/// Attempt counter driven by the transport; resets once a connection is
/// established again
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn connected(&mut self) {
        self.attempts = 0;
    }

    /// Delay before the next attempt, or `None` to give up
    pub fn next_attempt(&mut self) -> Option<Duration> {
        self.attempts += 1;
        self.policy.next_delay(self.attempts)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
