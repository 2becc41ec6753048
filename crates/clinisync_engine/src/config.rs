//! Tier-dependent engine configuration.

use crate::error::{SyncError, SyncResult};
use clinisync_protocol::ResolutionStrategy;
use std::time::Duration;

/// Subscription tier the configuration presets are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Small batches, few retries.
    Free,
    /// Mid-size batches.
    Premium,
    /// Large batches, most retries.
    Enterprise,
}

/// Configuration read once at [`crate::SyncEngine::initialize`].
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Entities transmitted concurrently per batch.
    pub batch_size: usize,
    /// Retry bound and backoff.
    pub retry: RetryConfig,
    /// Period of the automatic sync timer while online.
    pub sync_interval: Duration,
    /// Timeout applied to each entity transmission.
    pub request_timeout: Duration,
    /// Strategy used by [`crate::SyncEngine::resolve_conflict_default`].
    pub conflict_resolution_default: ResolutionStrategy,
    /// Pause inserted between consecutive batches.
    pub batch_pause: Duration,
    /// Connectivity assumed until the first `set_online` call.
    pub start_online: bool,
}

impl TierConfig {
    /// Returns the preset for a tier.
    pub fn for_tier(tier: Tier) -> Self {
        let base = Self {
            batch_size: 50,
            retry: RetryConfig::new(5, Duration::from_secs(1)),
            sync_interval: Duration::from_secs(15 * 60),
            request_timeout: Duration::from_secs(30),
            conflict_resolution_default: ResolutionStrategy::Local,
            batch_pause: Duration::from_millis(100),
            start_online: true,
        };
        match tier {
            Tier::Free => Self {
                batch_size: 10,
                retry: RetryConfig::new(3, Duration::from_secs(2)),
                conflict_resolution_default: ResolutionStrategy::Remote,
                ..base
            },
            Tier::Premium => base,
            Tier::Enterprise => Self {
                batch_size: 200,
                retry: RetryConfig::new(10, Duration::from_millis(500)),
                request_timeout: Duration::from_secs(60),
                ..base
            },
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the default conflict resolution strategy.
    pub fn with_conflict_resolution_default(mut self, strategy: ResolutionStrategy) -> Self {
        self.conflict_resolution_default = strategy;
        self
    }

    /// Sets the pause between batches.
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Sets the initial connectivity.
    pub fn with_start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidArgument`] for a zero batch size, zero
    /// retry bound, or zero sync interval.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidArgument("batch_size must be > 0".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(SyncError::InvalidArgument("max_retries must be > 0".into()));
        }
        if self.sync_interval.is_zero() {
            return Err(SyncError::InvalidArgument(
                "sync_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::for_tier(Tier::Premium)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Failed attempts after which an entity is parked in `error`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub base_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Returns the delay before retry `attempt` (1-based): `base_delay * 2^(attempt-1)`.
    ///
    /// Attempt 0 has no delay. Saturates at `Duration::MAX`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(0);
        if factor == 0 {
            return Duration::MAX;
        }
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_presets_scale_up() {
        let free = TierConfig::for_tier(Tier::Free);
        let premium = TierConfig::for_tier(Tier::Premium);
        let enterprise = TierConfig::for_tier(Tier::Enterprise);

        assert!(free.batch_size < premium.batch_size);
        assert!(premium.batch_size < enterprise.batch_size);
        assert!(free.retry.max_retries < enterprise.retry.max_retries);
        assert_eq!(free.sync_interval, Duration::from_secs(900));
        assert_eq!(free.batch_pause, Duration::from_millis(100));
        assert!(free.start_online);
    }

    #[test]
    fn builder_overrides() {
        let config = TierConfig::default()
            .with_batch_size(7)
            .with_request_timeout(Duration::from_secs(2))
            .with_conflict_resolution_default(ResolutionStrategy::Merge)
            .with_start_online(false);

        assert_eq!(config.batch_size, 7);
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.conflict_resolution_default, ResolutionStrategy::Merge);
        assert!(!config.start_online);
    }

    #[test]
    fn validate_rejects_zeroes() {
        assert!(TierConfig::default().validate().is_ok());
        assert!(matches!(
            TierConfig::default().with_batch_size(0).validate(),
            Err(SyncError::InvalidArgument(_))
        ));
        assert!(TierConfig::default()
            .with_retry(RetryConfig::new(0, Duration::from_secs(1)))
            .validate()
            .is_err());
        assert!(TierConfig::default()
            .with_sync_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn retry_delay_doubles() {
        let config = RetryConfig::new(5, Duration::from_millis(100));

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn retry_delay_saturates() {
        let config = RetryConfig::new(100, Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(64), Duration::MAX);
        assert_eq!(config.delay_for_attempt(200), Duration::MAX);
    }
}
