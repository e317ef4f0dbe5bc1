use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_core::auth::{
    HttpRefreshTransport, RefreshGrant, RefreshTransport, TokenCoordinator, ACCESS_TOKEN_KEY,
};
use tether_core::net::{HttpRequestSender, RequestSender};
use tether_core::queue::{OfflineRequestQueue, SqliteQueueStore};
use tether_core::{CredentialStore, NetworkError, TetherConfig};

use crate::error::CliError;
use crate::keychain::KeychainCredentialStore;

/// Everything a command needs, resolved once from flags, `.env`, and config.
pub struct Context {
    pub config: TetherConfig,
    pub db_path: PathBuf,
    pub credentials: Arc<KeychainCredentialStore>,
}

impl Context {
    pub fn load(
        config_path: Option<PathBuf>,
        db_path: Option<PathBuf>,
        profile: &str,
    ) -> Result<Self, CliError> {
        let config = TetherConfig::load(resolve_config_path(config_path))?;
        let db_path = resolve_db_path(db_path, &config);
        tracing::debug!("Using profile '{}' with queue at {}", profile, db_path.display());
        Ok(Self {
            config,
            db_path,
            credentials: Arc::new(KeychainCredentialStore::new(profile)),
        })
    }

    pub fn stored_access_token(&self) -> Result<Option<String>, CliError> {
        Ok(self.credentials.get(ACCESS_TOKEN_KEY)?)
    }

    /// Coordinator backed by the keychain. Refreshing requires `auth_url`;
    /// without it every refresh fails with a configuration message.
    pub fn coordinator(&self) -> Result<TokenCoordinator, CliError> {
        let transport: Arc<dyn RefreshTransport> = match self.config.auth_url.as_deref() {
            Some(auth_url) => Arc::new(HttpRefreshTransport::new(auth_url)?),
            None => Arc::new(UnconfiguredTransport),
        };
        Ok(TokenCoordinator::spawn_with_threshold(
            self.credentials.clone(),
            self.config.jwt_validator(),
            transport,
            self.config.refresh_threshold(),
        ))
    }

    pub fn queue_store(&self) -> Result<SqliteQueueStore, CliError> {
        Ok(SqliteQueueStore::open(&self.db_path)?)
    }

    pub fn queue(&self) -> Result<OfflineRequestQueue, CliError> {
        let base_url = self.config.require_api_base_url()?;
        let sender: Arc<dyn RequestSender> =
            Arc::new(HttpRequestSender::new(base_url, self.coordinator()?)?);
        Ok(OfflineRequestQueue::new(
            Arc::new(self.queue_store()?),
            sender,
            self.config.queue_config(),
        ))
    }
}

struct UnconfiguredTransport;

#[async_trait]
impl RefreshTransport for UnconfiguredTransport {
    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshGrant, NetworkError> {
        Err(NetworkError::BadRequest(
            "auth_url is not configured (set TETHER_AUTH_URL)".to_string(),
        ))
    }
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("TETHER_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("config.json")
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, config: &TetherConfig) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TETHER_DB_PATH").map(PathBuf::from))
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("queue.db")
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - timestamp).num_milliseconds();
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < 0 {
        let ahead = -diff;
        if ahead < minute {
            "in <1m".to_string()
        } else if ahead < hour {
            format!("in {}m", ahead / minute)
        } else if ahead < day {
            format!("in {}h", ahead / hour)
        } else {
            format!("in {}d", ahead / day)
        }
    } else if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn normalize_endpoint(endpoint: &str) -> Result<String, CliError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyEndpoint);
    }
    Ok(trimmed.to_string())
}
