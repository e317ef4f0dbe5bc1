//! Credential persistence in the OS keychain.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use tether_core::auth::CredentialStore;
use tether_core::error::{StorageError, StorageResult};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "tether-cli";

/// One keychain entry per `(profile, key)` pair.
#[derive(Debug, Clone)]
pub struct KeychainCredentialStore {
    profile: String,
}

impl KeychainCredentialStore {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
        }
    }

    fn username(&self, key: &str) -> String {
        format!("{key}:{}", self.profile)
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self, key: &str) -> Result<Entry, keyring::Error> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username(key))
    }
}

impl CredentialStore for KeychainCredentialStore {
    #[cfg(not(test))]
    fn save(&self, secret: &str, key: &str) -> StorageResult<()> {
        self.entry(key)
            .and_then(|entry| entry.set_password(secret))
            .map_err(|error| StorageError::UnableToSave(error.to_string()))
    }

    #[cfg(test)]
    fn save(&self, secret: &str, key: &str) -> StorageResult<()> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| StorageError::UnableToSave(error.to_string()))?;
        guard.insert(self.username(key), secret.to_string());
        Ok(())
    }

    #[cfg(not(test))]
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entry = self
            .entry(key)
            .map_err(|error| StorageError::UnableToRetrieve(error.to_string()))?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::BadEncoding(_)) => Err(StorageError::InvalidData(format!(
                "keychain entry for {key} is not valid UTF-8"
            ))),
            Err(error) => Err(StorageError::UnableToRetrieve(error.to_string())),
        }
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| StorageError::UnableToRetrieve(error.to_string()))?;
        Ok(guard.get(&self.username(key)).cloned())
    }

    #[cfg(not(test))]
    fn delete(&self, key: &str) -> StorageResult<()> {
        let entry = self
            .entry(key)
            .map_err(|error| StorageError::UnableToDelete(error.to_string()))?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(StorageError::UnableToDelete(error.to_string())),
        }
    }

    #[cfg(test)]
    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| StorageError::UnableToDelete(error.to_string()))?;
        guard.remove(&self.username(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tether_core::auth::ACCESS_TOKEN_KEY;

    use super::*;

    #[test]
    fn profiles_do_not_share_entries() {
        let work = KeychainCredentialStore::new("keychain-test-work");
        let home = KeychainCredentialStore::new("keychain-test-home");

        work.save("work-token", ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(work.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("work-token"));
        assert_eq!(home.get(ACCESS_TOKEN_KEY).unwrap(), None);

        work.delete(ACCESS_TOKEN_KEY).unwrap();
        work.delete(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(work.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }
}
