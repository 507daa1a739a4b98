//! Connection state and reconnect budget

use std::fmt;
use std::time::Duration;

/// Lifecycle of the single logical push connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to
    #[default]
    Idle,
    /// A transport open is in flight
    Connecting,
    /// Frames are flowing
    Open,
    /// Waiting `fixed_delay` before the next attempt
    Reconnecting,
    /// Attempt budget spent; only an explicit `connect()` resumes
    Exhausted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded reconnection budget for one failure episode
///
/// `attempts_used` never exceeds `max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    fixed_delay: Duration,
    max_attempts: u32,
    attempts_used: u32,
}

impl ReconnectPolicy {
    pub fn new(fixed_delay: Duration, max_attempts: u32) -> Self {
        Self {
            fixed_delay,
            max_attempts,
            attempts_used: 0,
        }
    }

    pub fn fixed_delay(&self) -> Duration {
        self.fixed_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts - self.attempts_used
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_used >= self.max_attempts
    }

    /// Spend one attempt. Returns the 1-based attempt number, or `None`
    /// when the budget is already spent.
    pub fn try_consume(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts_used += 1;
        Some(self.attempts_used)
    }

    pub fn reset(&mut self) {
        self.attempts_used = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 5)
    }
}
