//! Resolution of replayed writes the server rejected as stale (HTTP 409).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    ServerWins,
    ClientWins,
    /// Resolves as `ServerWins`: responses carry no comparable server timestamp.
    NewerWins,
    /// Resolves as `ServerWins` until a user-facing merge flow exists.
    Manual,
}

/// Local and server payloads for one rejected write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub local_data: Vec<u8>,
    pub server_data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub const fn new() -> Self {
        Self
    }

    /// Pick the payload to resend. Neither side of `conflict` is modified.
    pub fn resolve(&self, conflict: &Conflict, strategy: ConflictStrategy) -> Vec<u8> {
        let resolved = match strategy {
            ConflictStrategy::ClientWins => &conflict.local_data,
            ConflictStrategy::ServerWins | ConflictStrategy::NewerWins | ConflictStrategy::Manual => {
                &conflict.server_data
            }
        };
        tracing::debug!(
            endpoint = %conflict.endpoint,
            strategy = ?strategy,
            "Resolved sync conflict"
        );
        resolved.clone()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn conflict() -> Conflict {
        Conflict {
            local_data: br#"{"progress":40}"#.to_vec(),
            server_data: br#"{"progress":55}"#.to_vec(),
            timestamp: Utc::now(),
            endpoint: "/v1/courses/7/progress".to_string(),
            metadata: BTreeMap::from([("method".to_string(), "PUT".to_string())]),
        }
    }

    #[test]
    fn server_wins_returns_server_bytes() {
        let conflict = conflict();
        let resolved = ConflictResolver::new().resolve(&conflict, ConflictStrategy::ServerWins);
        assert_eq!(resolved, conflict.server_data);
    }

    #[test]
    fn client_wins_returns_local_bytes() {
        let conflict = conflict();
        let resolved = ConflictResolver::new().resolve(&conflict, ConflictStrategy::ClientWins);
        assert_eq!(resolved, conflict.local_data);
    }

    #[test]
    fn newer_wins_and_manual_defer_to_server() {
        let conflict = conflict();
        let resolver = ConflictResolver::new();
        assert_eq!(
            resolver.resolve(&conflict, ConflictStrategy::NewerWins),
            conflict.server_data
        );
        assert_eq!(
            resolver.resolve(&conflict, ConflictStrategy::Manual),
            conflict.server_data
        );
    }

    #[test]
    fn resolving_leaves_inputs_untouched() {
        let original = conflict();
        let copy = original.clone();
        let _ = ConflictResolver::new().resolve(&copy, ConflictStrategy::ClientWins);
        assert_eq!(copy, original);
    }

    #[test]
    fn strategy_names_in_config() {
        let strategy: ConflictStrategy = serde_json::from_str(r#""client_wins""#).unwrap();
        assert_eq!(strategy, ConflictStrategy::ClientWins);
    }
}
