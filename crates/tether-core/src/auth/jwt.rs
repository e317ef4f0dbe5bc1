//! Bearer token claim decoding.
//!
//! The client never holds signing keys, so signatures are not verified here;
//! the server remains the authority. This validator only guards against
//! malformed or foreign tokens before they are stored or attached to requests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::util::from_unix_seconds;

const MISSING_ISSUER: &str = "(missing)";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("Token must have exactly three dot-separated segments")]
    InvalidFormat,
    #[error("Token payload is not valid base64url")]
    InvalidBase64,
    #[error("Token payload is missing required claims")]
    MissingClaims,
    #[error("Token issuer is not accepted: {0}")]
    InvalidIssuer(String),
}

/// Claims decoded from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub email: String,
    pub role: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: Option<String>,
    pub is_expired: bool,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    email: Option<String>,
    role: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    iss: Option<String>,
}

/// Stateless validator configured with the accepted issuers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JwtValidator {
    accepted_issuers: Vec<String>,
}

impl JwtValidator {
    /// An empty allow-list accepts any issuer; otherwise `iss` must be
    /// present and listed.
    pub fn new<I, S>(accepted_issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted_issuers: accepted_issuers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepted_issuers(&self) -> &[String] {
        &self.accepted_issuers
    }

    pub fn validate(&self, token: &str) -> Result<Claims, JwtError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, JwtError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        let [_, payload, _] = segments.as_slice() else {
            return Err(JwtError::InvalidFormat);
        };

        let bytes = decode_segment(payload)?;
        let raw: RawClaims =
            serde_json::from_slice(&bytes).map_err(|_| JwtError::MissingClaims)?;

        let (Some(subject), Some(email), Some(role), Some(exp), Some(iat)) =
            (raw.sub, raw.email, raw.role, raw.exp, raw.iat)
        else {
            return Err(JwtError::MissingClaims);
        };
        let expires_at = from_unix_seconds(exp).ok_or(JwtError::MissingClaims)?;
        let issued_at = from_unix_seconds(iat).ok_or(JwtError::MissingClaims)?;

        // A non-empty allow-list also rejects tokens that omit `iss`.
        if !self.accepted_issuers.is_empty() {
            match raw.iss.as_deref() {
                Some(issuer) if self.accepts_issuer(issuer) => {}
                Some(issuer) => return Err(JwtError::InvalidIssuer(issuer.to_string())),
                None => return Err(JwtError::InvalidIssuer(MISSING_ISSUER.to_string())),
            }
        }

        Ok(Claims {
            subject,
            email,
            role,
            issued_at,
            expires_at,
            issuer: raw.iss,
            is_expired: now >= expires_at,
        })
    }

    fn accepts_issuer(&self, issuer: &str) -> bool {
        self.accepted_issuers
            .iter()
            .any(|accepted| accepted == issuer)
    }
}

/// Decode one base64url segment, tolerating missing padding.
fn decode_segment(segment: &str) -> Result<Vec<u8>, JwtError> {
    let mut normalized: String = segment
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    STANDARD
        .decode(normalized.as_bytes())
        .map_err(|_| JwtError::InvalidBase64)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::testing::{encode_token, token_expiring_at};

    const ISSUER: &str = "https://auth.example.com";

    fn validator() -> JwtValidator {
        JwtValidator::new([ISSUER, "https://auth.staging.example.com"])
    }

    #[test]
    fn decodes_required_claims() {
        let now = Utc::now();
        let token = token_expiring_at(now + TimeDelta::seconds(600), ISSUER);
        let claims = validator().validate_at(&token, now).unwrap();

        assert_eq!(claims.subject, "user-1");
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.role, "authenticated");
        assert_eq!(claims.issuer.as_deref(), Some(ISSUER));
        assert!(!claims.is_expired);
    }

    #[test]
    fn marks_token_expired_at_exact_expiry() {
        let now = Utc::now();
        let expires_at = from_unix_seconds(now.timestamp()).unwrap();
        let token = token_expiring_at(expires_at, ISSUER);
        let claims = validator().validate_at(&token, expires_at).unwrap();
        assert!(claims.is_expired);
    }

    #[test]
    fn two_segment_token_is_invalid_format() {
        assert_eq!(
            validator().validate("header.payload").unwrap_err(),
            JwtError::InvalidFormat
        );
        assert_eq!(
            validator().validate("a.b.c.d").unwrap_err(),
            JwtError::InvalidFormat
        );
    }

    #[test]
    fn rejects_non_base64_payload() {
        assert_eq!(
            validator().validate("header.!!!.sig").unwrap_err(),
            JwtError::InvalidBase64
        );
    }

    #[test]
    fn rejects_missing_claims() {
        let token = encode_token(&serde_json::json!({
            "sub": "user-1",
            "role": "authenticated",
            "exp": 2_000_000_000_i64,
            "iat": 1_900_000_000_i64,
        }));
        assert_eq!(
            validator().validate(&token).unwrap_err(),
            JwtError::MissingClaims
        );
    }

    #[test]
    fn rejects_unknown_issuer() {
        let token = token_expiring_at(Utc::now() + TimeDelta::hours(1), "https://evil.example");
        assert_eq!(
            validator().validate(&token).unwrap_err(),
            JwtError::InvalidIssuer("https://evil.example".to_string())
        );
    }

    #[test]
    fn empty_allow_list_accepts_any_issuer() {
        let token = token_expiring_at(Utc::now() + TimeDelta::hours(1), "https://other.example");
        assert!(JwtValidator::default().validate(&token).is_ok());
    }

    fn token_without_issuer() -> String {
        encode_token(&serde_json::json!({
            "sub": "user-1",
            "email": "user@example.com",
            "role": "authenticated",
            "exp": 2_000_000_000_i64,
            "iat": 1_900_000_000_i64,
        }))
    }

    #[test]
    fn allow_list_rejects_token_without_issuer() {
        assert_eq!(
            validator().validate(&token_without_issuer()).unwrap_err(),
            JwtError::InvalidIssuer(MISSING_ISSUER.to_string())
        );
    }

    #[test]
    fn empty_allow_list_accepts_token_without_issuer() {
        let claims = JwtValidator::default()
            .validate(&token_without_issuer())
            .unwrap();
        assert_eq!(claims.issuer, None);
    }

    #[test]
    fn decodes_url_safe_alphabet() {
        // "?>" encodes to "Pz4" in base64url, which contains no padding.
        assert_eq!(decode_segment("Pz4").unwrap(), b"?>".to_vec());
        // 0xfb 0xff encodes to "-_8" in base64url.
        assert_eq!(decode_segment("-_8").unwrap(), vec![0xfb, 0xff]);
    }
}
