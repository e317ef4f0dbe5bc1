//! Retry classification and backoff schedule for replayed requests.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFLICT_STATUS: u16 = 409;

const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Maps an attempt number (0-based) to a wait duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential {
        #[serde(with = "duration_secs")]
        base: Duration,
    },
    Linear {
        #[serde(with = "duration_secs")]
        interval: Duration,
    },
    Fixed {
        #[serde(with = "duration_secs")]
        interval: Duration,
    },
}

impl BackoffStrategy {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Exponential { base } => {
                let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
            Self::Linear { interval } => interval.saturating_mul(attempt.saturating_add(1)),
            Self::Fixed { interval } => interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    /// Three attempts, exponential backoff from one second.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                base: Duration::from_secs(1),
            },
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetryPolicy {
    /// Five attempts, exponential backoff from half a second.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffStrategy::Exponential {
                base: Duration::from_millis(500),
            },
            retryable_status_codes: default_retryable_status_codes(),
        }
    }

    /// A single attempt; nothing is retryable.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::Fixed {
                interval: Duration::ZERO,
            },
            retryable_status_codes: BTreeSet::new(),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    pub fn should_retry(&self, status: u16, attempt: u32) -> bool {
        attempt < self.max_attempts && self.is_retryable(status)
    }

    pub const fn is_conflict(status: u16) -> bool {
        status == CONFLICT_STATUS
    }
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect()
}

/// Durations as fractional seconds in config files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn exponential_delay_doubles_and_strictly_increases() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        for attempt in 0..16 {
            assert!(policy.delay(attempt + 1) > policy.delay(attempt));
        }
    }

    #[test]
    fn linear_delay_strictly_increases() {
        let strategy = BackoffStrategy::Linear {
            interval: Duration::from_millis(250),
        };
        assert_eq!(strategy.delay(0), Duration::from_millis(250));
        assert_eq!(strategy.delay(3), Duration::from_millis(1000));
        for attempt in 0..16 {
            assert!(strategy.delay(attempt + 1) > strategy.delay(attempt));
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let strategy = BackoffStrategy::Fixed {
            interval: Duration::from_secs(3),
        };
        assert!((0..10).all(|attempt| strategy.delay(attempt) == Duration::from_secs(3)));
    }

    #[test]
    fn exponential_delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::aggressive();
        assert!(policy.delay(200) >= policy.delay(31));
    }

    #[test]
    fn should_retry_requires_budget_and_retryable_status() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(503, 0));
        assert!(policy.should_retry(429, 2));
        assert!(!policy.should_retry(503, 3));
        assert!(!policy.should_retry(400, 0));
        assert!(!policy.should_retry(CONFLICT_STATUS, 0));
    }

    #[test]
    fn presets_match_documented_values() {
        assert_eq!(RetryPolicy::default().max_attempts, 3);
        assert_eq!(RetryPolicy::aggressive().max_attempts, 5);
        assert_eq!(RetryPolicy::aggressive().delay(0), Duration::from_millis(500));
        let none = RetryPolicy::none();
        assert_eq!(none.max_attempts, 1);
        assert!(!none.should_retry(503, 0));
    }

    #[test]
    fn policy_deserializes_from_config_json() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 4, "backoff": {"kind": "linear", "interval": 1.5}}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay(1), Duration::from_secs(3));
        assert!(policy.is_retryable(504));
    }
}
