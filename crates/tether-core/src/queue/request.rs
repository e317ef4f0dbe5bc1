//! Queued request model and discard rules

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::net::{HttpMethod, RetryPolicy};

/// A unique identifier for a queued request, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new unique request ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// When a queued request is abandoned for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardPolicy {
    pub max_age: TimeDelta,
    pub max_attempts: u32,
}

impl Default for DiscardPolicy {
    fn default() -> Self {
        Self {
            max_age: TimeDelta::hours(24),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Older than the discard policy's maximum age
    Expired,
    /// Reached the discard policy's attempt limit
    TooManyAttempts,
    /// Retryable failure, but the retry policy's budget is spent
    RetriesExhausted,
    /// The server answered with a status that will not succeed on replay
    Rejected,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Expired => "expired",
            Self::TooManyAttempts => "too many attempts",
            Self::RetriesExhausted => "retries exhausted",
            Self::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

/// A mutating request waiting to be replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub endpoint: String,
    pub method: HttpMethod,
    /// Opaque request payload
    pub body: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueuedRequest {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, method: HttpMethod, body: Option<Vec<u8>>) -> Self {
        Self {
            id: RequestId::new(),
            endpoint: endpoint.into(),
            method,
            body,
            created_at: Utc::now(),
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }

    pub fn discard_reason(&self, now: DateTime<Utc>, policy: &DiscardPolicy) -> Option<DiscardReason> {
        if self.age_at(now) > policy.max_age {
            Some(DiscardReason::Expired)
        } else if self.attempts >= policy.max_attempts {
            Some(DiscardReason::TooManyAttempts)
        } else {
            None
        }
    }

    /// Discard check against the default 24 hour / 5 attempt policy.
    pub fn should_discard(&self, now: DateTime<Utc>) -> bool {
        self.discard_reason(now, &DiscardPolicy::default()).is_some()
    }

    /// Whether the backoff delay since the last attempt has elapsed.
    pub fn is_due_at(&self, now: DateTime<Utc>, retry: &RetryPolicy) -> bool {
        let Some(last_attempt_at) = self.last_attempt_at else {
            return true;
        };
        let delay = retry.delay(self.attempts.saturating_sub(1));
        TimeDelta::from_std(delay)
            .ok()
            .and_then(|delay| last_attempt_at.checked_add_signed(delay))
            .is_some_and(|next_attempt_at| now >= next_attempt_at)
    }

    pub fn record_attempt(&mut self, now: DateTime<Utc>, error: Option<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.last_error = error;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::net::BackoffStrategy;

    fn request_with(attempts: u32, age: TimeDelta) -> QueuedRequest {
        let mut request = QueuedRequest::new("/v1/activity", HttpMethod::Post, None);
        request.attempts = attempts;
        request.created_at = Utc::now() - age;
        request
    }

    #[test]
    fn five_attempts_are_discarded_regardless_of_age() {
        let request = request_with(5, TimeDelta::minutes(1));
        assert!(request.should_discard(Utc::now()));
        assert_eq!(
            request.discard_reason(Utc::now(), &DiscardPolicy::default()),
            Some(DiscardReason::TooManyAttempts)
        );
    }

    #[test]
    fn day_old_request_is_discarded_regardless_of_attempts() {
        let request = request_with(0, TimeDelta::hours(25));
        assert!(request.should_discard(Utc::now()));
        assert_eq!(
            request.discard_reason(Utc::now(), &DiscardPolicy::default()),
            Some(DiscardReason::Expired)
        );
    }

    #[test]
    fn four_attempts_an_hour_old_is_kept() {
        let request = request_with(4, TimeDelta::hours(1));
        assert!(!request.should_discard(Utc::now()));
    }

    #[test]
    fn backoff_gates_the_next_attempt() {
        let retry = RetryPolicy {
            backoff: BackoffStrategy::Fixed {
                interval: Duration::from_secs(30),
            },
            ..RetryPolicy::aggressive()
        };
        let mut request = request_with(0, TimeDelta::minutes(5));
        let now = Utc::now();
        assert!(request.is_due_at(now, &retry));

        request.record_attempt(now, Some("HTTP 503".to_string()));
        assert_eq!(request.attempts, 1);
        assert!(!request.is_due_at(now + TimeDelta::seconds(10), &retry));
        assert!(request.is_due_at(now + TimeDelta::seconds(30), &retry));
    }

    #[test]
    fn request_id_parses_from_display() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
