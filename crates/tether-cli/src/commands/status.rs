use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_core::net::{ReachabilityProbe, TcpProbe};
use tether_core::queue::QueueStore;
use tether_core::{NetworkSnapshot, SyncState};

use crate::commands::common::{format_relative_time, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// `None` when no reachability probe is configured
    pub connectivity: Option<NetworkSnapshot>,
    pub pending_count: usize,
    pub signed_in: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub token_error: Option<String>,
    pub database_path: String,
}

pub async fn run_status(context: &Context, json: bool) -> Result<(), CliError> {
    let pending_count = context.queue_store()?.count()?;

    let connectivity = match context.config.probe.address.as_deref() {
        Some(address) => {
            let probe = TcpProbe::new(address, context.config.probe.timeout());
            let status = probe.probe().await;
            Some(NetworkSnapshot {
                is_connected: status.is_connected,
                connection_type: status.connection_type,
                is_syncing: false,
                pending_count,
            })
        }
        None => None,
    };

    let (token_expires_at, token_error) = match context.stored_access_token()? {
        Some(token) => match context.config.jwt_validator().validate(&token) {
            Ok(claims) => (Some(claims.expires_at), None),
            Err(error) => (None, Some(error.to_string())),
        },
        None => (None, None),
    };

    let report = StatusReport {
        connectivity,
        pending_count,
        signed_in: token_expires_at.is_some(),
        token_expires_at,
        token_error,
        database_path: context.db_path.display().to_string(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report, Utc::now()) {
            println!("{line}");
        }
    }
    Ok(())
}

pub const fn sync_state_label(state: SyncState) -> &'static str {
    match state {
        SyncState::Offline => "offline",
        SyncState::Syncing => "syncing",
        SyncState::Pending => "pending",
        SyncState::Synced => "synced",
    }
}

pub fn format_status_lines(report: &StatusReport, now: DateTime<Utc>) -> Vec<String> {
    let network = report.connectivity.map_or_else(
        || "unknown (no probe configured)".to_string(),
        |snapshot| sync_state_label(snapshot.sync_state()).to_string(),
    );
    let credential = match (&report.token_expires_at, &report.token_error) {
        (Some(expires_at), _) if *expires_at <= now => {
            format!("expired {}", format_relative_time(*expires_at, now))
        }
        (Some(expires_at), _) => {
            format!("valid, expires {}", format_relative_time(*expires_at, now))
        }
        (None, Some(error)) => format!("invalid ({error})"),
        (None, None) => "not signed in".to_string(),
    };

    vec![
        format!("network:    {network}"),
        format!("credential: {credential}"),
        format!("queued:     {}", report.pending_count),
        format!("database:   {}", report.database_path),
    ]
}
