//! Executor configuration
//!
//! [`ExecutorConfig`] is the serializable part of an executor's setup. It is
//! immutable once an executor is built. Configuration can be layered: start
//! from defaults or a file, then apply [`ConfigOverrides`] loaded from the
//! environment or the command line.
//!
//! # Example
//!
//! ```rust,ignore
//! use retrier::config::{ConfigOverrides, ExecutorConfig};
//!
//! // RETRIER_PARALLELISM=16 RETRIER_GLOBAL_TIMEOUT_MS=5000
//! let config = ExecutorConfig::from_env("RETRIER_")?;
//!
//! let config = config.merge(ConfigOverrides {
//!     max_attempts: Some(5),
//!     ..Default::default()
//! });
//! ```

mod env;

pub use env::{build_env_key, get_env, get_env_millis, get_env_parse};

use crate::delay::{ConstantDelay, DelayPolicy, ExponentialDelay};
use crate::{Result, RetrierError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Scheduling strategy used by an executor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// One Tokio task per attempt, admission bounded by a semaphore
    #[default]
    Immediate,
    /// Deadline-ordered heap feeding a fixed worker pool
    Queued,
}

impl FromStr for StrategyKind {
    type Err = RetrierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(StrategyKind::Immediate),
            "queued" => Ok(StrategyKind::Queued),
            other => Err(RetrierError::Config(format!(
                "Unknown strategy '{}', expected 'immediate' or 'queued'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Immediate => write!(f, "immediate"),
            StrategyKind::Queued => write!(f, "queued"),
        }
    }
}

/// Serializable description of a delay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayConfig {
    Constant {
        #[serde(rename = "delay_ms", with = "millis")]
        delay: Duration,
    },
    Exponential {
        #[serde(rename = "initial_ms", with = "millis")]
        initial: Duration,
        #[serde(rename = "cap_ms", with = "millis")]
        cap: Duration,
    },
}

impl DelayConfig {
    /// Build the policy this configuration describes
    pub fn policy(&self) -> Arc<dyn DelayPolicy> {
        match *self {
            DelayConfig::Constant { delay } => Arc::new(ConstantDelay::new(delay)),
            DelayConfig::Exponential { initial, cap } => {
                Arc::new(ExponentialDelay::new(initial, cap))
            }
        }
    }

    /// Delay before the first retry
    pub fn base_delay(&self) -> Duration {
        match *self {
            DelayConfig::Constant { delay } => delay,
            DelayConfig::Exponential { initial, .. } => initial,
        }
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig::Constant {
            delay: Duration::from_millis(100),
        }
    }
}

/// Serializable executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub strategy: StrategyKind,

    /// Maximum number of attempts running at once
    pub parallelism: usize,

    /// Attempts per task, including the first
    pub max_attempts: u32,

    /// Capacity of the hand-off channel between dispatcher and workers
    /// (queued strategy only)
    pub max_queue_depth: usize,

    pub delay: DelayConfig,

    /// Deadline for a whole task across all attempts; `None` disables it
    #[serde(rename = "global_timeout_ms", with = "optional_millis")]
    pub global_timeout: Option<Duration>,

    /// Deadline for a single attempt; `None` disables it
    #[serde(rename = "attempt_timeout_ms", with = "optional_millis")]
    pub attempt_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Immediate,
            parallelism: 10,
            max_attempts: 3,
            max_queue_depth: 100,
            delay: DelayConfig::default(),
            global_timeout: None,
            attempt_timeout: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp every field into its valid range
    ///
    /// Counts below one become one; zero timeouts become disabled.
    pub fn normalized(mut self) -> Self {
        self.parallelism = self.parallelism.max(1);
        self.max_attempts = self.max_attempts.max(1);
        self.max_queue_depth = self.max_queue_depth.max(1);
        self.global_timeout = self.global_timeout.filter(|t| !t.is_zero());
        self.attempt_timeout = self.attempt_timeout.filter(|t| !t.is_zero());
        self
    }

    /// Apply overrides on top of this configuration
    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(strategy) = overrides.strategy {
            self.strategy = strategy;
        }
        if let Some(parallelism) = overrides.parallelism {
            self.parallelism = parallelism;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(depth) = overrides.max_queue_depth {
            self.max_queue_depth = depth;
        }
        if overrides.delay.is_some() || overrides.backoff_cap.is_some() {
            let base = overrides.delay.unwrap_or_else(|| self.delay.base_delay());
            let cap = match (overrides.backoff_cap, self.delay) {
                (Some(cap), _) => Some(cap),
                (None, DelayConfig::Exponential { cap, .. }) => Some(cap),
                (None, DelayConfig::Constant { .. }) => None,
            };
            self.delay = match cap {
                Some(cap) => DelayConfig::Exponential { initial: base, cap },
                None => DelayConfig::Constant { delay: base },
            };
        }
        if let Some(timeout) = overrides.global_timeout {
            self.global_timeout = Some(timeout);
        }
        if let Some(timeout) = overrides.attempt_timeout {
            self.attempt_timeout = Some(timeout);
        }
        self.normalized()
    }

    /// Defaults overridden by `{prefix}*` environment variables
    ///
    /// See [`ConfigOverrides::from_env`] for the recognised variables.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Ok(Self::default().merge(ConfigOverrides::from_env(prefix)?))
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn delay_policy(&self) -> Arc<dyn DelayPolicy> {
        self.delay.policy()
    }
}

/// Partial configuration layered onto an [`ExecutorConfig`]
///
/// Setting `delay` alone keeps the current policy shape; setting
/// `backoff_cap` switches to an exponential policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub strategy: Option<StrategyKind>,
    pub parallelism: Option<usize>,
    pub max_attempts: Option<u32>,
    pub max_queue_depth: Option<usize>,
    pub delay: Option<Duration>,
    pub backoff_cap: Option<Duration>,
    /// `Some(Duration::ZERO)` disables the timeout
    pub global_timeout: Option<Duration>,
    /// `Some(Duration::ZERO)` disables the timeout
    pub attempt_timeout: Option<Duration>,
}

impl ConfigOverrides {
    /// Load overrides from environment variables
    ///
    /// | variable | meaning |
    /// |----------|---------|
    /// | `{prefix}STRATEGY` | `immediate` or `queued` |
    /// | `{prefix}PARALLELISM` | worker count |
    /// | `{prefix}MAX_ATTEMPTS` | attempts per task |
    /// | `{prefix}MAX_QUEUE_DEPTH` | queued strategy channel capacity |
    /// | `{prefix}DELAY_MS` | retry delay (initial delay when exponential) |
    /// | `{prefix}BACKOFF_CAP_MS` | enables exponential backoff with this cap |
    /// | `{prefix}GLOBAL_TIMEOUT_MS` | whole-task timeout, `<= 0` disables |
    /// | `{prefix}ATTEMPT_TIMEOUT_MS` | per-attempt timeout, `<= 0` disables |
    ///
    /// Signed counts below one clamp to one.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let key = |name: &str| build_env_key(prefix, name);

        let strategy = match get_env(&key("strategy"))? {
            Some(value) => Some(value.parse::<StrategyKind>()?),
            None => None,
        };

        Ok(Self {
            strategy,
            parallelism: get_env_parse::<i64>(&key("parallelism"))?.map(clamp_count),
            max_attempts: get_env_parse::<i64>(&key("max_attempts"))?
                .map(|n| n.clamp(1, i64::from(u32::MAX)) as u32),
            max_queue_depth: get_env_parse::<i64>(&key("max_queue_depth"))?.map(clamp_count),
            delay: get_env_millis(&key("delay_ms"))?,
            backoff_cap: get_env_millis(&key("backoff_cap_ms"))?,
            global_timeout: get_env_millis(&key("global_timeout_ms"))?,
            attempt_timeout: get_env_millis(&key("attempt_timeout_ms"))?,
        })
    }
}

fn clamp_count(n: i64) -> usize {
    usize::try_from(n.max(1)).unwrap_or(usize::MAX)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis.max(0) as u64))
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_u64(0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<i64>::deserialize(deserializer)?;
        Ok(millis
            .filter(|m| *m > 0)
            .map(|m| Duration::from_millis(m as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.strategy, StrategyKind::Immediate);
        assert_eq!(config.parallelism, 10);
        assert_eq!(config.max_attempts, 3);
        assert!(config.global_timeout.is_none());
        assert!(config.attempt_timeout.is_none());
    }

    #[test]
    fn test_normalized_clamps() {
        let config = ExecutorConfig {
            parallelism: 0,
            max_attempts: 0,
            max_queue_depth: 0,
            global_timeout: Some(Duration::ZERO),
            attempt_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.parallelism, 1);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.max_queue_depth, 1);
        assert!(config.global_timeout.is_none());
        assert_eq!(config.attempt_timeout, Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Queued".parse::<StrategyKind>().unwrap(), StrategyKind::Queued);
        assert_eq!(" immediate ".parse::<StrategyKind>().unwrap(), StrategyKind::Immediate);
        assert!("round-robin".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_merge_delay_shapes() {
        let config = ExecutorConfig::default().merge(ConfigOverrides {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        assert_eq!(
            config.delay,
            DelayConfig::Constant {
                delay: Duration::from_millis(20)
            }
        );

        let config = config.merge(ConfigOverrides {
            backoff_cap: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        assert_eq!(
            config.delay,
            DelayConfig::Exponential {
                initial: Duration::from_millis(20),
                cap: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_merge_zero_timeout_disables() {
        let config = ExecutorConfig {
            global_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
        .merge(ConfigOverrides {
            global_timeout: Some(Duration::ZERO),
            ..Default::default()
        });
        assert!(config.global_timeout.is_none());
    }

    #[test]
    fn test_from_env() {
        env::set_var("RETRIER_ENVTEST_STRATEGY", "queued");
        env::set_var("RETRIER_ENVTEST_PARALLELISM", "-4");
        env::set_var("RETRIER_ENVTEST_MAX_ATTEMPTS", "7");
        env::set_var("RETRIER_ENVTEST_DELAY_MS", "-50");
        env::set_var("RETRIER_ENVTEST_ATTEMPT_TIMEOUT_MS", "250");

        let config = ExecutorConfig::from_env("RETRIER_ENVTEST_").unwrap();
        assert_eq!(config.strategy, StrategyKind::Queued);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.delay.base_delay(), Duration::ZERO);
        assert_eq!(config.attempt_timeout, Some(Duration::from_millis(250)));
        assert!(config.global_timeout.is_none());

        for name in [
            "STRATEGY",
            "PARALLELISM",
            "MAX_ATTEMPTS",
            "DELAY_MS",
            "ATTEMPT_TIMEOUT_MS",
        ] {
            env::remove_var(format!("RETRIER_ENVTEST_{}", name));
        }
    }

    #[test]
    fn test_from_env_rejects_bad_strategy() {
        env::set_var("RETRIER_BADSTRAT_STRATEGY", "fastest");
        assert!(ExecutorConfig::from_env("RETRIER_BADSTRAT_").is_err());
        env::remove_var("RETRIER_BADSTRAT_STRATEGY");
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let config = ExecutorConfig {
            strategy: StrategyKind::Queued,
            delay: DelayConfig::Exponential {
                initial: Duration::from_millis(10),
                cap: Duration::from_millis(500),
            },
            global_timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        };

        let json = config.to_json().unwrap();
        assert!(json.contains("\"global_timeout_ms\": 3000"));
        assert!(json.contains("\"kind\": \"exponential\""));
        assert_eq!(ExecutorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ExecutorConfig::from_json(r#"{"parallelism": 0, "attempt_timeout_ms": -1}"#).unwrap();
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.max_attempts, 3);
        assert!(config.attempt_timeout.is_none());
    }
}
