//! Delay policies between attempts
//!
//! A delay policy maps the number of attempts made so far to the time the
//! executor waits before the next attempt becomes eligible.

use std::fmt::Debug;
use std::time::Duration;

/// Maps an attempt number (1-based) to the wait before the next attempt
pub trait DelayPolicy: Debug + Send + Sync {
    /// Delay to apply after `attempt` attempts have been made
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay after every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantDelay {
    delay: Duration,
}

impl ConstantDelay {
    /// Create a constant policy
    ///
    /// # Example
    ///
    /// ```rust
    /// use retrier::{ConstantDelay, DelayPolicy};
    /// use std::time::Duration;
    ///
    /// let policy = ConstantDelay::new(Duration::from_millis(50));
    /// assert_eq!(policy.delay(1), Duration::from_millis(50));
    /// assert_eq!(policy.delay(9), Duration::from_millis(50));
    /// ```
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Create a constant policy from signed milliseconds; negatives clamp to zero
    pub fn from_millis(millis: i64) -> Self {
        Self::new(Duration::from_millis(millis.max(0) as u64))
    }

    /// Policy that retries immediately
    pub fn zero() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Default for ConstantDelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl DelayPolicy for ConstantDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Doubling delay capped at a maximum
///
/// `delay(n) = min(initial * 2^(n-1), cap)`. The attempt number at which the
/// cap is first reached is computed once so large attempt numbers never
/// overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialDelay {
    initial: Duration,
    cap: Duration,
    /// First attempt number whose uncapped delay reaches `cap`
    cap_attempt: u32,
}

impl ExponentialDelay {
    /// Create an exponential policy
    ///
    /// A zero `initial` degenerates to a constant zero delay. A `cap` below
    /// `initial` is raised to `initial`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use retrier::{DelayPolicy, ExponentialDelay};
    /// use std::time::Duration;
    ///
    /// let policy = ExponentialDelay::new(Duration::from_millis(10), Duration::from_millis(50));
    /// assert_eq!(policy.delay(1), Duration::from_millis(10));
    /// assert_eq!(policy.delay(3), Duration::from_millis(40));
    /// assert_eq!(policy.delay(4), Duration::from_millis(50));
    /// ```
    pub fn new(initial: Duration, cap: Duration) -> Self {
        let cap = cap.max(initial);

        let mut cap_attempt = 1u32;
        if !initial.is_zero() {
            let cap_nanos = cap.as_nanos();
            let mut current = initial.as_nanos();
            while current < cap_nanos {
                current <<= 1;
                cap_attempt += 1;
            }
        }

        Self {
            initial,
            cap,
            cap_attempt,
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// First attempt number that returns exactly `cap`
    pub fn cap_attempt(&self) -> u32 {
        self.cap_attempt
    }
}

impl DelayPolicy for ExponentialDelay {
    fn delay(&self, attempt: u32) -> Duration {
        if self.initial.is_zero() {
            return Duration::ZERO;
        }
        if attempt == 0 {
            return self.initial;
        }
        if attempt >= self.cap_attempt {
            return self.cap;
        }

        // Below cap_attempt the shifted value is strictly less than cap.
        let nanos = self.initial.as_nanos() << (attempt - 1);
        duration_from_nanos(nanos)
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    Duration::new(
        (nanos / NANOS_PER_SEC) as u64,
        (nanos % NANOS_PER_SEC) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_constant_default() {
        let policy = ConstantDelay::default();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
    }

    #[test]
    fn test_constant_negative_clamps_to_zero() {
        let policy = ConstantDelay::from_millis(-25);
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert_eq!(policy, ConstantDelay::zero());
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = ExponentialDelay::new(Duration::from_secs(1), Duration::from_secs(100));

        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_cap() {
        let policy = ExponentialDelay::new(Duration::from_secs(10), Duration::from_secs(50));

        // 10, 20, 40, then 80 is capped
        assert_eq!(policy.cap_attempt(), 4);
        assert_eq!(policy.delay(3), Duration::from_secs(40));
        assert_eq!(policy.delay(4), Duration::from_secs(50));
        assert_eq!(policy.delay(5), Duration::from_secs(50));
    }

    #[test]
    fn test_exponential_huge_attempt_does_not_overflow() {
        let policy = ExponentialDelay::new(Duration::from_nanos(1), Duration::from_secs(3600));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(3600));
        assert_eq!(policy.delay(200), Duration::from_secs(3600));
    }

    #[test]
    fn test_exponential_attempt_zero_returns_initial() {
        let policy = ExponentialDelay::new(Duration::from_millis(5), Duration::from_millis(80));
        assert_eq!(policy.delay(0), Duration::from_millis(5));
    }

    #[test]
    fn test_exponential_zero_initial_degenerates() {
        let policy = ExponentialDelay::new(Duration::ZERO, Duration::from_secs(5));
        for attempt in 0..10 {
            assert_eq!(policy.delay(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn test_exponential_cap_below_initial_is_raised() {
        let policy = ExponentialDelay::new(Duration::from_millis(200), Duration::from_millis(50));
        assert_eq!(policy.cap(), Duration::from_millis(200));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(7), Duration::from_millis(200));
    }

    #[test]
    fn test_exponential_non_power_of_two_cap() {
        let policy = ExponentialDelay::new(Duration::from_millis(3), Duration::from_millis(20));
        assert_eq!(policy.delay(3), Duration::from_millis(12));
        assert_eq!(policy.delay(4), Duration::from_millis(20));
    }

    proptest! {
        #[test]
        fn prop_exponential_monotonic_and_capped(
            initial_ms in 0u64..10_000,
            cap_ms in 0u64..1_000_000,
            attempt in 1u32..500,
        ) {
            let policy = ExponentialDelay::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(cap_ms),
            );
            let current = policy.delay(attempt);
            let next = policy.delay(attempt + 1);

            prop_assert!(current <= next);
            prop_assert!(next <= policy.cap());
        }

        #[test]
        fn prop_constant_is_exact(delay_ms in 0u64..100_000, attempt in 0u32..10_000) {
            let policy = ConstantDelay::new(Duration::from_millis(delay_ms));
            prop_assert_eq!(policy.delay(attempt), Duration::from_millis(delay_ms));
        }
    }
}
