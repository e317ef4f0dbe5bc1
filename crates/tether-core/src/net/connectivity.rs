//! Network reachability monitoring.
//!
//! One `watch` sender holds the latest status; every subscriber gets its own
//! receiver, so any number of listeners can observe changes independently
//! and drop out without affecting the others. Status comes either from the
//! host platform through [`ConnectivityMonitor::report`] or from a polling
//! [`ReachabilityProbe`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::ConnectionType;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
}

impl ConnectionStatus {
    pub const OFFLINE: Self = Self {
        is_connected: false,
        connection_type: ConnectionType::Unknown,
    };

    pub const fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            connection_type,
        }
    }
}

/// Source of reachability samples for the polling backend.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync + 'static {
    async fn probe(&self) -> ConnectionStatus;
}

/// Treats a successful TCP handshake with `address` as being online.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self) -> ConnectionStatus {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => ConnectionStatus::online(ConnectionType::Unknown),
            Ok(Err(error)) => {
                tracing::debug!(address = %self.address, "Reachability probe failed: {}", error);
                ConnectionStatus::OFFLINE
            }
            Err(_) => {
                tracing::debug!(address = %self.address, "Reachability probe timed out");
                ConnectionStatus::OFFLINE
            }
        }
    }
}

pub struct ConnectivityMonitor {
    status: Arc<watch::Sender<ConnectionStatus>>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectionStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            status: Arc::new(status),
            probe_task: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.status.borrow().connection_type
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Publish a status observed by the host platform.
    pub fn report(&self, status: ConnectionStatus) {
        publish(&self.status, status);
    }

    /// Subscribe to connectivity changes.
    ///
    /// The first call to [`ConnectivityChanges::next`] yields the current
    /// state; later calls yield only when connectivity flips.
    pub fn changes(&self) -> ConnectivityChanges {
        ConnectivityChanges {
            receiver: self.status.subscribe(),
            last: None,
        }
    }

    /// Poll `probe` every `interval` until the monitor is dropped.
    ///
    /// Replaces any previously running probe.
    pub fn spawn_probe(&self, probe: Arc<dyn ReachabilityProbe>, interval: Duration) {
        let status = Arc::clone(&self.status);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sample = probe.probe().await;
                publish(&status, sample);
            }
        });

        match self.probe_task.lock() {
            Ok(mut guard) => {
                if let Some(previous) = guard.replace(handle) {
                    previous.abort();
                }
            }
            Err(error) => {
                tracing::error!("Connectivity probe state poisoned: {}", error);
                handle.abort();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.status.receiver_count()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.probe_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn publish(sender: &watch::Sender<ConnectionStatus>, status: ConnectionStatus) {
    let changed = sender.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
    if changed {
        tracing::info!(
            connected = status.is_connected,
            connection_type = ?status.connection_type,
            "Connectivity changed"
        );
    }
}

/// Per-subscriber stream of connectivity flips.
///
/// Rapid flips between two polls of [`next`](Self::next) may be coalesced,
/// but consecutive yields never repeat a value. Dropping the subscription
/// releases its receiver.
pub struct ConnectivityChanges {
    receiver: watch::Receiver<ConnectionStatus>,
    last: Option<bool>,
}

impl ConnectivityChanges {
    /// Next connectivity value, or `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<bool> {
        loop {
            if self.last.is_some() && self.receiver.changed().await.is_err() {
                return None;
            }
            let connected = self.receiver.borrow_and_update().is_connected;
            if self.last != Some(connected) {
                self.last = Some(connected);
                return Some(connected);
            }
        }
    }
}
