//! Reconnect-driven queue draining.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::net::{ConnectivityMonitor, HttpMethod};
use crate::queue::{DrainReport, OfflineRequestQueue, QueuedRequest, SubmitOutcome};
use crate::state::NetworkSnapshot;

struct Inner {
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<OfflineRequestQueue>,
    syncing: AtomicBool,
    snapshot: watch::Sender<NetworkSnapshot>,
}

/// Marks a sync in flight; clearing it republishes the snapshot.
struct SyncGuard<'a>(&'a Inner);

impl<'a> SyncGuard<'a> {
    fn acquire(inner: &'a Inner) -> Option<Self> {
        inner
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        inner.refresh_snapshot();
        Some(Self(inner))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.syncing.store(false, Ordering::Release);
        self.0.refresh_snapshot();
    }
}

impl Inner {
    fn current_snapshot(&self) -> NetworkSnapshot {
        let status = self.monitor.status();
        let pending_count = match self.queue.pending_count() {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!("Failed to count queued requests: {}", error);
                self.snapshot.borrow().pending_count
            }
        };
        NetworkSnapshot {
            is_connected: status.is_connected,
            connection_type: status.connection_type,
            is_syncing: self.syncing.load(Ordering::Acquire),
            pending_count,
        }
    }

    fn refresh_snapshot(&self) {
        let next = self.current_snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn sync(&self) -> crate::Result<Option<DrainReport>> {
        if !self.monitor.is_connected() {
            return Ok(None);
        }
        let Some(_guard) = SyncGuard::acquire(self) else {
            tracing::debug!("Sync already in progress");
            return Ok(None);
        };

        let pending = self.queue.pending_count()?;
        tracing::info!("Syncing {} queued requests", pending);
        let report = self.queue.process_queue().await?;
        Ok(Some(report))
    }
}

/// Drains the offline queue whenever connectivity returns and publishes a
/// [`NetworkSnapshot`] for UI readers.
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    /// Subscribe to `monitor` and start listening.
    ///
    /// Must be called from within a tokio runtime. If the monitor already
    /// reports a connection, the first sync starts right away.
    pub fn start(monitor: Arc<ConnectivityMonitor>, queue: Arc<OfflineRequestQueue>) -> Self {
        let (snapshot, _) = watch::channel(NetworkSnapshot::default());
        let inner = Arc::new(Inner {
            monitor,
            queue,
            syncing: AtomicBool::new(false),
            snapshot,
        });
        inner.refresh_snapshot();

        let mut changes = inner.monitor.changes();
        let listener = tokio::spawn({
            let inner = Arc::clone(&inner);
            async move {
                while let Some(connected) = changes.next().await {
                    if connected {
                        if let Err(error) = inner.sync().await {
                            tracing::error!("Sync after reconnect failed: {}", error);
                        }
                    } else {
                        tracing::debug!("Offline, queued requests wait for reconnect");
                        inner.refresh_snapshot();
                    }
                }
            }
        });

        Self {
            inner,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Drain now instead of waiting for a reconnect.
    ///
    /// Returns `None` while offline or when a sync is already running.
    pub async fn force_sync_now(&self) -> crate::Result<Option<DrainReport>> {
        self.inner.sync().await
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        *self.inner.snapshot.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    pub fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: Option<Vec<u8>>,
    ) -> crate::Result<QueuedRequest> {
        let queued = self.inner.queue.enqueue(endpoint, method, body)?;
        self.inner.refresh_snapshot();
        Ok(queued)
    }

    /// Send now when online, otherwise queue without trying.
    pub async fn submit(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: Option<Vec<u8>>,
    ) -> crate::Result<SubmitOutcome> {
        let outcome = if self.inner.monitor.is_connected() {
            self.inner.queue.submit(endpoint, method, body).await
        } else {
            self.inner
                .queue
                .defer(endpoint, method, body)
                .map_err(Into::into)
        };
        self.inner.refresh_snapshot();
        outcome
    }

    /// Stop reacting to connectivity changes.
    pub fn shutdown(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
