//! Client configuration.

use std::time::Duration;

/// Exponential-backoff schedule for SSE reconnection:
/// `min(initial * factor^attempt, max)`, bounded by `max_retries`.
/// A server-supplied `retry:` field overrides the initial delay.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: u32,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 1.5,
            max_retries: 2,
        }
    }
}

impl ReconnectOptions {
    /// Delay before reconnection attempt `attempt` (0-based), honoring a
    /// server-advised override of the initial delay.
    pub fn delay_for(&self, attempt: u32, server_retry: Option<Duration>) -> Duration {
        let initial = server_retry.unwrap_or(self.initial_delay);
        let scaled = initial.as_millis() as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(scaled as u64).min(self.max_delay)
    }
}

/// Engine-level knobs
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default per-request timeout
    pub request_timeout: Duration,
    /// Refuse to send requests whose server capability was not advertised
    pub strict_capabilities: bool,
    pub reconnect: ReconnectOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            strict_capabilities: false,
            reconnect: ReconnectOptions::default(),
        }
    }
}
