//! Runtime configuration.
//!
//! `TetherConfig` is read from a JSON file, then selected fields may be
//! overridden from the environment. Secret credentials must never be stored
//! here; they belong in a [`CredentialStore`](crate::auth::CredentialStore).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::auth::JwtValidator;
use crate::error::{Error, Result};
use crate::net::RetryPolicy;
use crate::queue::{DiscardPolicy, QueueConfig};
use crate::sync::ConflictStrategy;
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_API_BASE_URL: &str = "TETHER_API_BASE_URL";
pub const ENV_AUTH_URL: &str = "TETHER_AUTH_URL";
pub const ENV_ACCEPTED_ISSUERS: &str = "TETHER_ACCEPTED_ISSUERS";

const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 120;
/// Access tokens live at least this long in practice; a larger threshold
/// would refresh on every request.
const MAX_REFRESH_THRESHOLD_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct TetherConfig {
    /// Base URL that relative queued endpoints resolve against
    pub api_base_url: Option<String>,
    /// Auth server exposing `/token?grant_type=refresh_token`
    pub auth_url: Option<String>,
    /// Empty accepts any issuer
    pub accepted_issuers: Vec<String>,
    pub refresh_threshold_secs: u64,
    pub retry: RetryPolicy,
    pub queue: QueueSettings,
    pub probe: ProbeSettings,
    pub database_path: Option<PathBuf>,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            auth_url: None,
            accepted_issuers: Vec::new(),
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            retry: RetryPolicy::aggressive(),
            queue: QueueSettings::default(),
            probe: ProbeSettings::default(),
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct QueueSettings {
    pub max_age_hours: u32,
    pub max_attempts: u32,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            max_attempts: 5,
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

/// Polling reachability probe. Disabled when `address` is unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ProbeSettings {
    /// `host:port` to open a TCP connection to
    pub address: Option<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            address: None,
            interval_secs: 30,
            timeout_secs: 3,
        }
    }
}

impl ProbeSettings {
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TetherConfig {
    /// Read `path`, apply environment overrides, and validate.
    ///
    /// A missing file yields the defaults (plus overrides).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(error) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {error}",
                    path.display()
                )))
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|error| Error::Config(format!("invalid config JSON: {error}")))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = normalize_text_option(lookup(ENV_API_BASE_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(url) = normalize_text_option(lookup(ENV_AUTH_URL)) {
            self.auth_url = Some(url);
        }
        if let Some(issuers) = normalize_text_option(lookup(ENV_ACCEPTED_ISSUERS)) {
            self.accepted_issuers = issuers
                .split(',')
                .filter_map(|issuer| normalize_text_option(Some(issuer.to_string())))
                .collect();
        }
    }

    /// Normalize URLs in place and reject unusable values.
    pub fn validate(&mut self) -> Result<()> {
        self.api_base_url = normalize_optional_http_url(self.api_base_url.take(), "api_base_url")?;
        self.auth_url = normalize_optional_http_url(self.auth_url.take(), "auth_url")?;

        if self.refresh_threshold_secs > MAX_REFRESH_THRESHOLD_SECS {
            return Err(Error::Config(format!(
                "refresh_threshold_secs must be at most {MAX_REFRESH_THRESHOLD_SECS}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.queue.max_attempts == 0 {
            return Err(Error::Config("queue.max_attempts must be at least 1".into()));
        }
        if self.queue.max_age_hours == 0 {
            return Err(Error::Config("queue.max_age_hours must be at least 1".into()));
        }
        if self.probe.address.is_some() && (self.probe.interval_secs == 0 || self.probe.timeout_secs == 0) {
            return Err(Error::Config(
                "probe.interval_secs and probe.timeout_secs must be positive".into(),
            ));
        }
        self.probe.address = normalize_text_option(self.probe.address.take());
        Ok(())
    }

    pub fn refresh_threshold(&self) -> TimeDelta {
        TimeDelta::try_seconds(i64::try_from(self.refresh_threshold_secs).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn jwt_validator(&self) -> JwtValidator {
        JwtValidator::new(self.accepted_issuers.iter().cloned())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            retry: self.retry.clone(),
            discard: DiscardPolicy {
                max_age: TimeDelta::hours(i64::from(self.queue.max_age_hours)),
                max_attempts: self.queue.max_attempts,
            },
            conflict_strategy: self.queue.conflict_strategy,
        }
    }

    pub fn require_api_base_url(&self) -> Result<&str> {
        self.api_base_url.as_deref().ok_or_else(|| {
            Error::Config(format!("api_base_url is not configured (set {ENV_API_BASE_URL})"))
        })
    }

    pub fn require_auth_url(&self) -> Result<&str> {
        self.auth_url
            .as_deref()
            .ok_or_else(|| Error::Config(format!("auth_url is not configured (set {ENV_AUTH_URL})")))
    }
}

fn normalize_optional_http_url(raw: Option<String>, field: &str) -> Result<Option<String>> {
    let Some(value) = normalize_text_option(raw) else {
        return Ok(None);
    };
    if is_http_url(&value) {
        Ok(Some(value.trim_end_matches('/').to_string()))
    } else {
        Err(Error::Config(format!(
            "config field '{field}' must include http:// or https://"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::net::BackoffStrategy;

    #[test]
    fn empty_object_yields_defaults() {
        let config = TetherConfig::from_json("{}").unwrap();
        assert_eq!(config, TetherConfig::default());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.refresh_threshold(), TimeDelta::seconds(120));
        assert_eq!(config.queue_config().discard, DiscardPolicy::default());
    }

    #[test]
    fn validate_rejects_oversized_refresh_threshold() {
        let mut config =
            TetherConfig::from_json(r#"{"refresh_threshold_secs": 18446744073709551615}"#).unwrap();
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("refresh_threshold_secs"));

        config.refresh_threshold_secs = MAX_REFRESH_THRESHOLD_SECS;
        config.validate().unwrap();
        assert_eq!(config.refresh_threshold(), TimeDelta::hours(1));
    }

    #[test]
    fn rejects_unknown_fields() {
        let error = TetherConfig::from_json(r#"{"queue": {"max_age": 3}}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parses_nested_settings() {
        let config = TetherConfig::from_json(
            r#"{
              "api_base_url": "https://api.example.com/",
              "retry": {
                "max_attempts": 2,
                "backoff": { "kind": "linear", "interval": 1.5 }
              },
              "queue": { "conflict_strategy": "client_wins", "max_attempts": 3 },
              "probe": { "address": "api.example.com:443" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(
            config.retry.backoff,
            BackoffStrategy::Linear {
                interval: Duration::from_millis(1500)
            }
        );
        let queue = config.queue_config();
        assert_eq!(queue.conflict_strategy, ConflictStrategy::ClientWins);
        assert_eq!(queue.discard.max_attempts, 3);
        assert_eq!(queue.discard.max_age, TimeDelta::hours(24));
        assert_eq!(config.probe.interval(), Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = TetherConfig {
            api_base_url: Some("https://file.example.com".to_string()),
            ..Default::default()
        };
        let env = HashMap::from([
            (ENV_API_BASE_URL, "https://env.example.com/"),
            (ENV_AUTH_URL, "  "),
            (ENV_ACCEPTED_ISSUERS, "https://a.example.com, ,https://b.example.com"),
        ]);

        config.apply_overrides(|key| env.get(key).map(ToString::to_string));
        config.validate().unwrap();

        assert_eq!(config.api_base_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.auth_url, None);
        assert_eq!(
            config.accepted_issuers,
            vec!["https://a.example.com", "https://b.example.com"]
        );
    }

    #[test]
    fn validate_rejects_non_http_urls() {
        let mut config = TetherConfig {
            auth_url: Some("auth.example.com".to_string()),
            ..Default::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("auth_url"));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = TetherConfig::default();
        config.queue.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TetherConfig::load(dir.path().join("absent.json"));
        // Environment overrides may apply, but loading itself must succeed.
        assert!(config.is_ok());
    }

    #[test]
    fn require_api_base_url_names_env_var() {
        let error = TetherConfig::default().require_api_base_url().unwrap_err();
        assert!(error.to_string().contains(ENV_API_BASE_URL));
    }
}
