use std::sync::Arc;

use chrono::{DateTime, Local};
use tether_core::net::{ConnectionStatus, ReachabilityProbe, TcpProbe};
use tether_core::{ConnectionType, ConnectivityMonitor, NetworkSnapshot, SyncOrchestrator};

use crate::commands::common::Context;
use crate::commands::queue::format_drain_report;
use crate::commands::status::sync_state_label;
use crate::error::CliError;

pub async fn run_sync(context: &Context, watch: bool) -> Result<(), CliError> {
    let address = context
        .config
        .probe
        .address
        .as_deref()
        .ok_or(CliError::ProbeNotConfigured)?;
    let probe = Arc::new(TcpProbe::new(address, context.config.probe.timeout()));
    let queue = Arc::new(context.queue()?);

    if !watch {
        let status = probe.probe().await;
        if !status.is_connected {
            println!("Offline ({address} unreachable); {} queued", queue.pending_count()?);
            return Ok(());
        }
        let report = queue.process_queue().await?;
        for line in format_drain_report(&report) {
            println!("{line}");
        }
        return Ok(());
    }

    let monitor = Arc::new(ConnectivityMonitor::new(ConnectionStatus::OFFLINE));
    monitor.spawn_probe(probe, context.config.probe.interval());
    let orchestrator = SyncOrchestrator::start(monitor, queue);
    let mut snapshots = orchestrator.subscribe();
    tracing::info!(
        "Watching {} every {}s, press Ctrl-C to stop",
        address,
        context.config.probe.interval_secs
    );
    println!("{}", format_snapshot_line(&orchestrator.snapshot(), Local::now()));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *snapshots.borrow_and_update();
                println!("{}", format_snapshot_line(&snapshot, Local::now()));
            }
        }
    }

    orchestrator.shutdown();
    Ok(())
}

pub const fn connection_type_label(connection_type: ConnectionType) -> &'static str {
    match connection_type {
        ConnectionType::Wifi => "wifi",
        ConnectionType::Cellular => "cellular",
        ConnectionType::Ethernet => "ethernet",
        ConnectionType::Unknown => "unknown",
    }
}

pub fn format_snapshot_line(snapshot: &NetworkSnapshot, at: DateTime<Local>) -> String {
    format!(
        "[{}] {:<7} link={} queued={}",
        at.format("%H:%M:%S"),
        sync_state_label(snapshot.sync_state()),
        connection_type_label(snapshot.connection_type),
        snapshot.pending_count
    )
}
