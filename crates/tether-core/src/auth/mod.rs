//! Access credential lifecycle: decoding, storage, and refresh.

mod coordinator;
mod credential;
mod jwt;
mod transport;

use thiserror::Error;

use crate::error::{NetworkError, StorageError};

pub use coordinator::TokenCoordinator;
pub use credential::{
    Credential, CredentialStore, MemoryCredentialStore, ACCESS_TOKEN_KEY,
    DEFAULT_REFRESH_THRESHOLD, REFRESH_TOKEN_KEY,
};
pub use jwt::{Claims, JwtError, JwtValidator};
pub use transport::{normalize_auth_url, HttpRefreshTransport, RefreshGrant, RefreshTransport};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("No stored credential is available")]
    TokenUnavailable,
    #[error(transparent)]
    InvalidToken(#[from] JwtError),
    #[error("Credential expires before it was issued")]
    InvalidLifetime,
    #[error("Secure storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[source] RefreshFailure),
    #[error("Token coordinator has shut down")]
    CoordinatorClosed,
}

impl TokenError {
    /// True when the user has to sign in again.
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::TokenUnavailable | Self::RefreshFailed(_))
    }
}

/// Underlying cause of a failed refresh.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error(transparent)]
    Network(NetworkError),
    #[error(transparent)]
    Storage(StorageError),
    #[error("Refresh response was unusable: {0}")]
    InvalidGrant(String),
}

pub type TokenResult<T> = Result<T, TokenError>;

#[cfg(test)]
pub(crate) mod testing {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use chrono::{DateTime, Utc};

    pub fn encode_token(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    pub fn token_expiring_at(expires_at: DateTime<Utc>, issuer: &str) -> String {
        encode_token(&serde_json::json!({
            "sub": "user-1",
            "email": "user@example.com",
            "role": "authenticated",
            "exp": expires_at.timestamp(),
            "iat": expires_at.timestamp() - 3600,
            "iss": issuer,
        }))
    }
}
