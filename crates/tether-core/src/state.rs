//! Shared network state types read by client UIs.

use serde::{Deserialize, Serialize};

/// Physical link reported by the platform, when known.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

/// Point-in-time view published by the sync orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
    pub is_syncing: bool,
    pub pending_count: usize,
}

impl NetworkSnapshot {
    /// Collapse the snapshot into the label-level state shown by clients.
    pub const fn sync_state(&self) -> SyncState {
        if !self.is_connected {
            SyncState::Offline
        } else if self.is_syncing {
            SyncState::Syncing
        } else if self.pending_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }
}

/// Unified sync state used by desktop and mobile clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    Pending,
    Synced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_prefers_offline_over_pending() {
        let snapshot = NetworkSnapshot {
            is_connected: false,
            pending_count: 3,
            ..Default::default()
        };
        assert_eq!(snapshot.sync_state(), SyncState::Offline);
    }

    #[test]
    fn sync_state_reports_pending_work_when_idle() {
        let snapshot = NetworkSnapshot {
            is_connected: true,
            pending_count: 2,
            ..Default::default()
        };
        assert_eq!(snapshot.sync_state(), SyncState::Pending);
        let drained = NetworkSnapshot {
            pending_count: 0,
            ..snapshot
        };
        assert_eq!(drained.sync_state(), SyncState::Synced);
    }
}
