//! tether-core - Network resilience layer
//!
//! This crate keeps an authenticated client usable on an unreliable network:
//! access token validation and single-flight refresh, connectivity
//! monitoring, retry classification, a persistent offline request queue, and
//! reconnect-driven sync.

pub mod auth;
pub mod config;
pub mod error;
pub mod net;
pub mod queue;
pub mod state;
pub mod sync;
pub mod util;

pub use auth::{Credential, CredentialStore, JwtValidator, TokenCoordinator, TokenError};
pub use config::TetherConfig;
pub use error::{Error, NetworkError, Result, StorageError};
pub use net::{ConnectivityMonitor, HttpMethod, RetryPolicy};
pub use queue::{DrainReport, OfflineRequestQueue, QueuedRequest};
pub use state::{ConnectionType, NetworkSnapshot, SyncState};
pub use sync::{ConflictResolver, ConflictStrategy, SyncOrchestrator};
