//! Credential model and the secure storage contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};

use super::jwt::Claims;
use super::TokenError;
use crate::error::{StorageError, StorageResult};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Refresh this long before the access token actually expires.
pub const DEFAULT_REFRESH_THRESHOLD: TimeDelta = TimeDelta::seconds(120);

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, TokenError> {
        if expires_at <= issued_at {
            return Err(TokenError::InvalidLifetime);
        }
        Ok(Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            issued_at,
            expires_at,
        })
    }

    pub fn from_claims(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        claims: &Claims,
    ) -> Result<Self, TokenError> {
        Self::new(
            access_token,
            refresh_token,
            claims.issued_at,
            claims.expires_at,
        )
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A threshold reaching past the representable range always refreshes.
    pub fn should_refresh_at(&self, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
        self.expires_at
            .checked_sub_signed(threshold)
            .is_none_or(|refresh_at| now >= refresh_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn should_refresh(&self, threshold: TimeDelta) -> bool {
        self.should_refresh_at(Utc::now(), threshold)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Durable key/secret storage provided by the host platform.
///
/// Deleting a key that does not exist succeeds.
pub trait CredentialStore: Send + Sync + 'static {
    fn save(&self, secret: &str, key: &str) -> StorageResult<()>;
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Process-local store, used for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, secret: &str, key: &str) -> StorageResult<()> {
        let mut guard = self
            .secrets
            .lock()
            .map_err(|error| StorageError::UnableToSave(error.to_string()))?;
        guard.insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let guard = self
            .secrets
            .lock()
            .map_err(|error| StorageError::UnableToRetrieve(error.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut guard = self
            .secrets
            .lock()
            .map_err(|error| StorageError::UnableToDelete(error.to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential_expiring_in(seconds: i64) -> Credential {
        let now = Utc::now();
        Credential::new(
            "access",
            "refresh",
            now - TimeDelta::seconds(600),
            now + TimeDelta::seconds(seconds),
        )
        .unwrap()
    }

    #[test]
    fn rejects_expiry_before_issue() {
        let now = Utc::now();
        let error = Credential::new("a", "r", now, now).unwrap_err();
        assert_eq!(error, TokenError::InvalidLifetime);
    }

    #[test]
    fn should_refresh_inside_threshold() {
        let credential = credential_expiring_in(60);
        assert!(credential.should_refresh(DEFAULT_REFRESH_THRESHOLD));
        assert!(!credential.is_expired());
    }

    #[test]
    fn should_refresh_boundary_is_inclusive() {
        let credential = credential_expiring_in(600);
        let boundary = credential.expires_at - DEFAULT_REFRESH_THRESHOLD;
        assert!(credential.should_refresh_at(boundary, DEFAULT_REFRESH_THRESHOLD));
        assert!(!credential.should_refresh_at(
            boundary - TimeDelta::milliseconds(1),
            DEFAULT_REFRESH_THRESHOLD
        ));
    }

    #[test]
    fn unrepresentable_threshold_forces_refresh() {
        let credential = credential_expiring_in(900);
        assert!(credential.should_refresh(TimeDelta::MAX));
        assert!(!credential.is_expired());
    }

    #[test]
    fn fresh_credential_does_not_need_refresh() {
        let credential = credential_expiring_in(900);
        assert!(!credential.should_refresh(DEFAULT_REFRESH_THRESHOLD));
    }

    #[test]
    fn credential_debug_redacts_tokens() {
        let credential = Credential::new(
            "secret-access-token",
            "secret-refresh-token",
            Utc::now(),
            Utc::now() + TimeDelta::hours(1),
        )
        .unwrap();
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn memory_store_round_trip_and_delete_missing() {
        let store = MemoryCredentialStore::new();
        store.save("value", ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(
            store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(),
            Some("value")
        );
        store.delete(ACCESS_TOKEN_KEY).unwrap();
        store.delete(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }
}
