use std::time::Duration;

/// Tunables for batching, parking and confirmation. Every phase timeout is
/// independent; a slow park never eats into the confirmation budget.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Force-flush a pending batch at this many requests.
    pub max_batch_size: usize,
    /// Quiet period after the last arrival before a pending batch is
    /// submitted.
    pub batch_debounce: Duration,
    /// Interval between blob readiness polls.
    pub parking_poll_interval: Duration,
    /// Overall budget for a blob to become parked.
    pub parking_timeout: Duration,
    /// Interval between receipt/attestation polls.
    pub confirmation_poll_interval: Duration,
    /// Overall budget for the chain and the provider to agree on a
    /// transaction.
    pub confirmation_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            batch_debounce: Duration::from_millis(500),
            parking_poll_interval: Duration::from_secs(1),
            parking_timeout: Duration::from_secs(7 * 60),
            confirmation_poll_interval: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl ClientConfig {
    /// Batch capacity with the lower bound of one applied.
    pub fn effective_max_batch_size(&self) -> usize {
        self.max_batch_size.max(1)
    }
}
