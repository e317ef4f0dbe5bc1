//! Error types for tether-core

use thiserror::Error;

use crate::auth::TokenError;
use crate::queue::QueueError;

/// Result type alias using tether-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tether-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Credential lifecycle error
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Network error
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Secure storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Offline queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Failures reported by a [`CredentialStore`](crate::auth::CredentialStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Unable to save secret: {0}")]
    UnableToSave(String),
    #[error("Unable to retrieve secret: {0}")]
    UnableToRetrieve(String),
    #[error("Unable to delete secret: {0}")]
    UnableToDelete(String),
    #[error("Secret not found: {0}")]
    ItemNotFound(String),
    #[error("Stored secret is invalid: {0}")]
    InvalidData(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Transport and HTTP status failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("No network connection")]
    NoConnection,
    #[error("Request timed out")]
    Timeout,
    #[error("Server error (HTTP {0})")]
    ServerError(u16),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not found")]
    NotFound,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict with server state")]
    Conflict,
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Failed to decode response: {0}")]
    Decoding(String),
    #[error("Transport failure: {0}")]
    Transport(String),
    /// No request was sent because no usable credential was available.
    #[error("No usable credential: {0}")]
    Credential(String),
}

impl NetworkError {
    /// Map a non-success HTTP status to an error. Returns `None` for 2xx/3xx.
    pub fn from_status(status: u16, message: &str) -> Option<Self> {
        let error = match status {
            200..=399 => return None,
            400 => Self::BadRequest(message.to_string()),
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            500..=599 => Self::ServerError(status),
            _ => Self::Status(status),
        };
        Some(error)
    }

    /// HTTP status equivalent used by the retry policy.
    ///
    /// Transport-level failures map onto the closest retryable status so the
    /// policy can classify them: timeouts as 408, lost connectivity and any
    /// other failure to get an answer as 503.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::NoConnection | Self::Transport(_) => Some(503),
            Self::Timeout => Some(408),
            Self::ServerError(code) | Self::Status(code) => Some(*code),
            Self::Unauthorized => Some(401),
            Self::Forbidden => Some(403),
            Self::NotFound => Some(404),
            Self::BadRequest(_) => Some(400),
            Self::Conflict => Some(409),
            Self::Decoding(_) | Self::Credential(_) => None,
        }
    }

    /// The request was never sent for lack of a credential.
    pub const fn is_credential_failure(&self) -> bool {
        matches!(self, Self::Credential(_))
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::NoConnection
        } else if error.is_decode() {
            Self::Decoding(error.to_string())
        } else if let Some(status) = error.status() {
            Self::from_status(status.as_u16(), &error.to_string())
                .unwrap_or_else(|| Self::Transport(error.to_string()))
        } else {
            Self::Transport(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_maps_documented_codes() {
        assert_eq!(NetworkError::from_status(204, ""), None);
        assert_eq!(
            NetworkError::from_status(400, "missing title"),
            Some(NetworkError::BadRequest("missing title".to_string()))
        );
        assert_eq!(
            NetworkError::from_status(401, ""),
            Some(NetworkError::Unauthorized)
        );
        assert_eq!(
            NetworkError::from_status(409, ""),
            Some(NetworkError::Conflict)
        );
        assert_eq!(
            NetworkError::from_status(502, ""),
            Some(NetworkError::ServerError(502))
        );
        assert_eq!(
            NetworkError::from_status(429, ""),
            Some(NetworkError::Status(429))
        );
    }

    #[test]
    fn transport_failures_have_retryable_status_equivalents() {
        assert_eq!(NetworkError::Timeout.status_code(), Some(408));
        assert_eq!(NetworkError::NoConnection.status_code(), Some(503));
        assert_eq!(NetworkError::Decoding("bad".into()).status_code(), None);
    }

    #[test]
    fn unanswered_requests_classify_as_unavailable() {
        assert_eq!(
            NetworkError::Transport("connection reset by peer".into()).status_code(),
            Some(503)
        );
        let missing = NetworkError::Credential("Token unavailable".into());
        assert_eq!(missing.status_code(), None);
        assert!(missing.is_credential_failure());
        assert!(!NetworkError::Unauthorized.is_credential_failure());
    }
}
