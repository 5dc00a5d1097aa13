use super::Reactor;
use crate::error::{Error, Result};
use crate::signal::{OverflowPolicy, SignalKind};

use std::time::Duration;

/// Settings a [`Reactor`] is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Signals relayed to watchers. Empty installs no handler at all.
    pub signals: Vec<SignalKind>,

    /// Cells in the preallocated signal ring.
    pub signal_pool_capacity: usize,

    pub overflow_policy: OverflowPolicy,

    /// Growth and shrink step of the poll array.
    pub poll_chunk: usize,

    /// Weight given to the later candidate by `Nearest` alignment. At 100
    /// both candidates weigh the same and ties go to the later one.
    pub nearest_bias_percent: u32,

    /// Largest alignment shift accepted, as a percentage of the period.
    pub max_shift_percent: u32,

    /// Pause after an allocation failure before the loop retries.
    pub low_memory_backoff: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            signals: SignalKind::DEFAULT_SET.to_vec(),
            signal_pool_capacity: 64,
            overflow_policy: OverflowPolicy::Abort,
            poll_chunk: 32,
            nearest_bias_percent: 100,
            max_shift_percent: 50,
            low_memory_backoff: Duration::from_millis(10),
        }
    }
}

/// Builder for configuring and creating a reactor.
///
/// # Examples
///
/// ```rust,no_run
/// use farm_reactor::{OverflowPolicy, ReactorBuilder, SignalKind};
///
/// let reactor = ReactorBuilder::new()
///     .signals([SignalKind::Terminate, SignalKind::Child])
///     .overflow_policy(OverflowPolicy::Drop)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReactorBuilder {
    config: ReactorConfig,
}

impl ReactorBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the relayed signal set.
    pub fn signals(mut self, signals: impl IntoIterator<Item = SignalKind>) -> Self {
        self.config.signals = signals.into_iter().collect();
        self
    }

    /// Relays no signal and installs no process-wide handler.
    pub fn without_signals(mut self) -> Self {
        self.config.signals.clear();
        self
    }

    pub fn signal_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.signal_pool_capacity = capacity;
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    pub fn poll_chunk(mut self, chunk: usize) -> Self {
        self.config.poll_chunk = chunk;
        self
    }

    pub fn nearest_bias_percent(mut self, percent: u32) -> Self {
        self.config.nearest_bias_percent = percent;
        self
    }

    pub fn max_shift_percent(mut self, percent: u32) -> Self {
        self.config.max_shift_percent = percent;
        self
    }

    pub fn low_memory_backoff(mut self, backoff: Duration) -> Self {
        self.config.low_memory_backoff = backoff;
        self
    }

    /// The configuration as set so far.
    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Validates the configuration and builds the reactor.
    ///
    /// This installs the signal relay when the signal set is non-empty.
    pub fn build(self) -> Result<Reactor> {
        if self.config.poll_chunk == 0 {
            return Err(Error::InvalidConfig("poll_chunk must be > 0"));
        }
        if self.config.signal_pool_capacity == 0 && !self.config.signals.is_empty() {
            return Err(Error::InvalidConfig("signal_pool_capacity must be > 0"));
        }

        Reactor::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReactorConfig::default();
        assert_eq!(config.signal_pool_capacity, 64);
        assert_eq!(config.poll_chunk, 32);
        assert_eq!(config.overflow_policy, OverflowPolicy::Abort);
        assert_eq!(config.signals.len(), 6);
    }

    #[test]
    fn test_setters() {
        let builder = ReactorBuilder::new()
            .without_signals()
            .poll_chunk(4)
            .max_shift_percent(20)
            .low_memory_backoff(Duration::from_millis(1));

        let config = builder.config();
        assert!(config.signals.is_empty());
        assert_eq!(config.poll_chunk, 4);
        assert_eq!(config.max_shift_percent, 20);
        assert_eq!(config.low_memory_backoff, Duration::from_millis(1));
    }

    #[test]
    fn test_rejects_zero_chunk() {
        let result = ReactorBuilder::new().without_signals().poll_chunk(0).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_pool() {
        let result = ReactorBuilder::new()
            .signals([SignalKind::User1])
            .signal_pool_capacity(0)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
