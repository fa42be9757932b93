//! Retry and network policy for download jobs.
//!
//! [`RetryPolicy`] controls how a worker handles transient transport
//! failures; [`NetworkRestriction`] together with a [`NetworkMonitor`]
//! decides whether a fetch may hit the network at all.

use std::time::Duration;

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay cap for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a worker handles transient fetch failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries; the first transient failure terminates the job.
    None,

    /// Fixed number of attempts with a constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff: the delay grows by `multiplier` after each
    /// failed attempt, capped at `max_delay`. Recommended for network
    /// operations.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Cap applied to the growing delay.
        max_delay: Duration,
        /// Multiplier applied after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(4)
    }
}

impl RetryPolicy {
    /// Exponential backoff with the default delay table.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Fixed-delay retries.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempt budget is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => {
                if attempt < *max_attempts {
                    Some(*delay)
                } else {
                    None
                }
            }
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt < *max_attempts {
                    let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                    let delay_ms = initial_delay.as_millis() as f64 * factor;
                    let capped = delay_ms.min(max_delay.as_millis() as f64);
                    Some(Duration::from_millis(capped as u64))
                } else {
                    None
                }
            }
        }
    }

    /// Maximum number of attempts allowed by this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Network-restriction policy for a download job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NetworkRestriction {
    /// No restriction; any connection may be used.
    #[default]
    None,
    /// Only unmetered (wifi) connections may be used; fetches on a metered
    /// connection are deferred, not failed.
    WifiOnly,
    /// Network use is disabled; only cached resources can complete.
    Disabled,
}

impl NetworkRestriction {
    /// Whether a fetch may proceed given the current connection.
    pub fn allows(&self, metered: bool) -> bool {
        match self {
            Self::None => true,
            Self::WifiOnly => !metered,
            Self::Disabled => false,
        }
    }
}

/// Reports whether the current connection is metered.
///
/// Queried before every fetch attempt so restriction changes take effect
/// mid-download.
pub trait NetworkMonitor: Send + Sync {
    /// True if the active connection is metered.
    fn is_metered(&self) -> bool;
}

/// A monitor that always reports an unmetered connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnmeteredNetwork;

impl NetworkMonitor for UnmeteredNetwork {
    fn is_metered(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_attempt(1), None);
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_retry_policy_exponential_doubles() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }

    #[test]
    fn test_retry_policy_exponential_capped() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        for attempt in 1..10 {
            assert!(policy.delay_for_attempt(attempt).unwrap() <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_retry_policy_default_is_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert!(matches!(policy, RetryPolicy::ExponentialBackoff { .. }));
    }

    #[test]
    fn test_network_restriction_allows() {
        assert!(NetworkRestriction::None.allows(true));
        assert!(NetworkRestriction::None.allows(false));

        assert!(NetworkRestriction::WifiOnly.allows(false));
        assert!(!NetworkRestriction::WifiOnly.allows(true));

        assert!(!NetworkRestriction::Disabled.allows(false));
        assert!(!NetworkRestriction::Disabled.allows(true));
    }

    #[test]
    fn test_unmetered_network_monitor() {
        assert!(!UnmeteredNetwork.is_metered());
    }
}
