//! Refresh-token exchange over HTTP.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::NetworkError;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Result of exchanging a refresh token.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshGrant {
    pub access_token: String,
    pub expires_in: i64,
}

impl fmt::Debug for RefreshGrant {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RefreshGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait RefreshTransport: Send + Sync + 'static {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, NetworkError>;
}

#[derive(Clone)]
pub struct HttpRefreshTransport {
    auth_url: String,
    client: Client,
}

impl HttpRefreshTransport {
    pub fn new(auth_url: impl AsRef<str>) -> Result<Self, NetworkError> {
        Self::with_client(auth_url, Client::builder().build()?)
    }

    pub fn with_client(auth_url: impl AsRef<str>, client: Client) -> Result<Self, NetworkError> {
        Ok(Self {
            auth_url: normalize_auth_url(auth_url.as_ref())?,
            client,
        })
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, NetworkError> {
        if refresh_token.trim().is_empty() {
            return Err(NetworkError::BadRequest(
                "Refresh token must not be empty".to_string(),
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
        let response = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", "refresh_token")])
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = parse_api_error(status, &body);
            return Err(NetworkError::from_status(status.as_u16(), &message)
                .unwrap_or(NetworkError::Status(status.as_u16())));
        }

        let body = response.text().await?;
        let payload: RefreshResponse = serde_json::from_str(&body)
            .map_err(|error| NetworkError::Decoding(error.to_string()))?;
        payload.into_grant()
    }
}

/// Trim trailing slashes and require an http(s) scheme.
pub fn normalize_auth_url(url: &str) -> Result<String, NetworkError> {
    let trimmed = normalize_text_option(Some(url.to_string()))
        .ok_or_else(|| NetworkError::BadRequest("Auth URL must not be empty".to_string()))?;
    if !is_http_url(&trimmed) {
        return Err(NetworkError::BadRequest(
            "Auth URL must include http:// or https://".to_string(),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    session: Option<RefreshResponseSession>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponseSession {
    access_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
}

impl RefreshResponse {
    fn into_grant(self) -> Result<RefreshGrant, NetworkError> {
        let nested = self.session;
        let access_token = self
            .access_token
            .or_else(|| nested.as_ref().and_then(|s| s.access_token.clone()))
            .and_then(|token| normalize_text_option(Some(token)))
            .ok_or_else(|| {
                NetworkError::Decoding("response did not include access_token".to_string())
            })?;

        let expires_in = self
            .expires_in
            .or_else(|| nested.as_ref().and_then(|s| s.expires_in))
            .or_else(|| {
                self.expires_at
                    .or_else(|| nested.as_ref().and_then(|s| s.expires_at))
                    .map(|expires_at| expires_at.saturating_sub(Utc::now().timestamp()))
            })
            .ok_or_else(|| {
                NetworkError::Decoding("response did not include expires_in/expires_at".to_string())
            })?;

        Ok(RefreshGrant {
            access_token,
            expires_in,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload
            .message
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
