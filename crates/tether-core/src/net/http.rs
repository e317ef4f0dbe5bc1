//! Authenticated request delivery.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::TokenCoordinator;
use crate::error::NetworkError;
use crate::util::{is_http_url, normalize_text_option};

/// Mutating methods eligible for offline queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(NetworkError::BadRequest(format!(
                "unsupported method for queued request: {other}"
            ))),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Delete => Self::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Body as text for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// Delivers a request and reports the server's answer.
///
/// Any HTTP status is `Ok`; `Err` means the request never got an answer.
/// [`NetworkError::Credential`] means it was not sent at all.
#[async_trait]
pub trait RequestSender: Send + Sync + 'static {
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, NetworkError>;
}

/// Sends requests with a bearer token from the [`TokenCoordinator`].
#[derive(Clone)]
pub struct HttpRequestSender {
    base_url: String,
    client: Client,
    tokens: TokenCoordinator,
}

impl HttpRequestSender {
    pub fn new(base_url: impl Into<String>, tokens: TokenCoordinator) -> Result<Self, NetworkError> {
        Self::with_client(base_url, Client::builder().build()?, tokens)
    }

    pub fn with_client(
        base_url: impl Into<String>,
        client: Client,
        tokens: TokenCoordinator,
    ) -> Result<Self, NetworkError> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .filter(|url| is_http_url(url))
            .ok_or_else(|| {
                NetworkError::BadRequest("API base URL must include http:// or https://".into())
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            tokens,
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        resolve_url(&self.base_url, endpoint)
    }

    async fn send_with_token(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
        access_token: &str,
    ) -> Result<HttpResponse, NetworkError> {
        let mut request = self
            .client
            .request(method.into(), url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl RequestSender for HttpRequestSender {
    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, NetworkError> {
        let url = self.url_for(endpoint);
        let credential = self.tokens.get_valid_token().await.map_err(|error| {
            tracing::warn!("No usable credential for {} {}: {}", method, url, error);
            NetworkError::Credential(error.to_string())
        })?;

        let response = self
            .send_with_token(method, &url, body, &credential.access_token)
            .await?;
        if response.status != StatusCode::UNAUTHORIZED.as_u16() {
            return Ok(response);
        }

        // The server rejected a token we believed valid; refresh once and replay.
        tracing::debug!("{} {} returned 401, forcing token refresh", method, url);
        let credential = self.tokens.force_refresh().await.map_err(|error| {
            tracing::warn!("Forced refresh after 401 failed: {}", error);
            NetworkError::Credential(error.to_string())
        })?;
        self.send_with_token(method, &url, body, &credential.access_token)
            .await
    }
}

fn resolve_url(base_url: &str, endpoint: &str) -> String {
    if is_http_url(endpoint) {
        endpoint.to_string()
    } else {
        format!("{}/{}", base_url, endpoint.trim_start_matches('/'))
    }
}
