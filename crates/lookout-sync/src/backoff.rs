//! Reconnect scheduling for the live feed.

use std::time::Duration;

use rand::Rng;

/// Delay before reconnecting after the feed connection closes.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(2500);

/// Upper bound on the exponential backoff delay.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Highest doubling exponent; larger attempts are capped anyway.
const MAX_EXPONENT: u32 = 16;

/// How long the feed client waits before each reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Always wait the same interval.
    Fixed(Duration),
    /// Double the delay per consecutive failure, up to `max`.
    Exponential {
        /// Delay before the first reconnect attempt.
        initial: Duration,
        /// Upper bound on the delay.
        max: Duration,
        /// Randomize each delay between half and all of its value.
        jitter: bool,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl ReconnectPolicy {
    /// The delay before reconnect attempt number `attempt` (1-based count
    /// of consecutive failures).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Exponential {
                initial,
                max,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
                let capped = initial
                    .saturating_mul(2_u32.saturating_pow(exponent))
                    .min(max);
                if jitter { equal_jitter(capped) } else { capped }
            }
        }
    }
}

/// Pick a delay uniformly between half of `delay` and `delay`.
fn equal_jitter(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let half = millis.checked_div(2).unwrap_or(0);
    let spread = rand::rng().random_range(0..=half);
    Duration::from_millis(half.saturating_add(spread))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_ignores_attempt() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(2500));
        assert_eq!(policy.delay(40), Duration::from_millis(2500));
    }

    #[test]
    fn exponential_doubles_until_capped() {
        let policy = ReconnectPolicy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(5), Duration::from_secs(10));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ReconnectPolicy::Exponential {
            initial: Duration::from_secs(4),
            max: Duration::from_secs(60),
            jitter: true,
        };
        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(4));
        }
    }
}
