//! Offline request queue
//!
//! Mutating requests that could not be delivered are persisted through a
//! [`QueueStore`] and replayed in creation order by
//! [`OfflineRequestQueue::process_queue`]. Each pass is triggered from outside
//! (usually by the sync orchestrator on reconnect); the queue never schedules
//! its own retries.

mod request;
mod sqlite;
mod store;

pub use request::{DiscardPolicy, DiscardReason, QueuedRequest, RequestId};
pub use sqlite::SqliteQueueStore;
pub use store::{MemoryQueueStore, QueueStore};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::error::NetworkError;
use crate::net::{HttpMethod, HttpResponse, RequestSender, RetryPolicy};
use crate::sync::{Conflict, ConflictResolver, ConflictStrategy};

/// Errors from queue persistence
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Queue database IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue storage lock poisoned")]
    Poisoned,
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Classifies replay failures and spaces out attempts
    pub retry: RetryPolicy,
    pub discard: DiscardPolicy,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::aggressive(),
            discard: DiscardPolicy::default(),
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

/// A request dropped during a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardedRequest {
    pub id: RequestId,
    pub method: HttpMethod,
    pub endpoint: String,
    pub attempts: u32,
    pub reason: DiscardReason,
    pub last_error: Option<String>,
}

/// Outcome of one [`OfflineRequestQueue::process_queue`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub sent: usize,
    /// Failed with a retryable error and kept for the next pass
    pub retained: usize,
    /// Skipped because their backoff delay has not elapsed
    pub deferred: usize,
    pub conflicts_resolved: usize,
    pub discarded: Vec<DiscardedRequest>,
    /// Set when the pass stopped early because no credential was available;
    /// the remaining requests were left untouched.
    pub halted: Option<String>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.sent == 0
            && self.retained == 0
            && self.deferred == 0
            && self.conflicts_resolved == 0
            && self.discarded.is_empty()
            && self.halted.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent(HttpResponse),
    Queued(RequestId),
}

/// Clears the drain flag however the pass ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OfflineRequestQueue {
    store: Arc<dyn QueueStore>,
    sender: Arc<dyn RequestSender>,
    resolver: ConflictResolver,
    config: QueueConfig,
    draining: AtomicBool,
}

impl OfflineRequestQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        sender: Arc<dyn RequestSender>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            sender,
            resolver: ConflictResolver::new(),
            config,
            draining: AtomicBool::new(false),
        }
    }

    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: Option<Vec<u8>>,
    ) -> QueueResult<QueuedRequest> {
        let request = QueuedRequest::new(endpoint, method, body);
        self.store.insert(&request)?;
        tracing::debug!(
            id = %request.id,
            "Queued {} {} for replay",
            request.method,
            request.endpoint
        );
        Ok(request)
    }

    pub fn pending_count(&self) -> QueueResult<usize> {
        self.store.count()
    }

    pub fn items(&self) -> QueueResult<Vec<QueuedRequest>> {
        self.store.list()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replay every queued request once, oldest first.
    ///
    /// Returns an empty report without touching the queue if another pass is
    /// already running.
    pub async fn process_queue(&self) -> QueueResult<DrainReport> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("Queue drain already in progress, skipping");
            return Ok(DrainReport::default());
        };

        let mut report = DrainReport::default();
        for request in self.store.list()? {
            let now = Utc::now();
            if let Some(reason) = request.discard_reason(now, &self.config.discard) {
                self.discard(request, reason, &mut report)?;
                continue;
            }
            if !request.is_due_at(now, &self.config.retry) {
                report.deferred += 1;
                continue;
            }

            let outcome = self
                .sender
                .send(request.method, &request.endpoint, request.body.as_deref())
                .await;
            match outcome {
                Ok(response) if RetryPolicy::is_conflict(response.status) => {
                    self.resolve_conflict(request, response, &mut report).await?;
                }
                outcome => self.settle(request, outcome, &mut report)?,
            }
            if let Some(reason) = &report.halted {
                tracing::warn!("Stopping queue drain, no usable credential: {}", reason);
                break;
            }
        }

        if !report.is_empty() {
            tracing::info!(
                sent = report.sent,
                retained = report.retained,
                deferred = report.deferred,
                conflicts = report.conflicts_resolved,
                discarded = report.discarded.len(),
                halted = report.halted.is_some(),
                "Offline queue drained"
            );
        }
        Ok(report)
    }

    /// Send now, or queue for replay if the failure is worth retrying.
    pub async fn submit(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: Option<Vec<u8>>,
    ) -> crate::Result<SubmitOutcome> {
        let endpoint = endpoint.into();
        let outcome = self.sender.send(method, &endpoint, body.as_deref()).await;
        let status = match outcome {
            Ok(response) if response.is_success() => return Ok(SubmitOutcome::Sent(response)),
            Ok(response) => {
                if !self.config.retry.is_retryable(response.status) {
                    return Err(failure_for(&response).into());
                }
                response.status
            }
            Err(error) if error.is_credential_failure() => {
                tracing::warn!("{} {} not sent ({}), queueing", method, endpoint, error);
                let queued = self.enqueue(endpoint, method, body)?;
                return Ok(SubmitOutcome::Queued(queued.id));
            }
            Err(error) => match error.status_code() {
                Some(status) if self.config.retry.is_retryable(status) => status,
                _ => return Err(error.into()),
            },
        };

        tracing::debug!("{} {} failed with {}, queueing", method, endpoint, status);
        let queued = self.enqueue(endpoint, method, body)?;
        Ok(SubmitOutcome::Queued(queued.id))
    }

    /// Queue directly without attempting delivery.
    pub fn defer(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: Option<Vec<u8>>,
    ) -> QueueResult<SubmitOutcome> {
        self.enqueue(endpoint, method, body)
            .map(|queued| SubmitOutcome::Queued(queued.id))
    }

    async fn resolve_conflict(
        &self,
        mut request: QueuedRequest,
        response: HttpResponse,
        report: &mut DrainReport,
    ) -> QueueResult<()> {
        let conflict = Conflict {
            local_data: request.body.clone().unwrap_or_default(),
            server_data: response.body,
            timestamp: Utc::now(),
            endpoint: request.endpoint.clone(),
            metadata: BTreeMap::from([
                ("request_id".to_string(), request.id.to_string()),
                ("method".to_string(), request.method.to_string()),
                ("attempts".to_string(), request.attempts.to_string()),
            ]),
        };
        let resolved = self
            .resolver
            .resolve(&conflict, self.config.conflict_strategy);
        report.conflicts_resolved += 1;
        request.body = (!resolved.is_empty()).then_some(resolved);

        let outcome = self
            .sender
            .send(request.method, &request.endpoint, request.body.as_deref())
            .await;
        self.settle(request, outcome, report)
    }

    fn settle(
        &self,
        mut request: QueuedRequest,
        outcome: Result<HttpResponse, NetworkError>,
        report: &mut DrainReport,
    ) -> QueueResult<()> {
        let (status, error) = match outcome {
            Ok(response) if response.is_success() => {
                self.store.remove(&request.id)?;
                report.sent += 1;
                return Ok(());
            }
            Ok(response) => (Some(response.status), failure_for(&response)),
            Err(error) if error.is_credential_failure() => {
                // Never sent: keep the request as is, apart from a resolved body.
                self.store.update(&request)?;
                report.halted = Some(error.to_string());
                return Ok(());
            }
            Err(error) => (error.status_code(), error),
        };

        let retryable = status.is_some_and(|status| self.config.retry.is_retryable(status));
        let retry = status.is_some_and(|status| {
            self.config.retry.should_retry(status, request.attempts)
        });
        request.record_attempt(Utc::now(), Some(error.to_string()));

        if retry {
            tracing::debug!(
                id = %request.id,
                attempts = request.attempts,
                "Replay of {} {} failed: {}",
                request.method,
                request.endpoint,
                error
            );
            self.store.update(&request)?;
            report.retained += 1;
            Ok(())
        } else {
            let reason = if retryable {
                DiscardReason::RetriesExhausted
            } else {
                DiscardReason::Rejected
            };
            self.discard(request, reason, report)
        }
    }

    fn discard(
        &self,
        request: QueuedRequest,
        reason: DiscardReason,
        report: &mut DrainReport,
    ) -> QueueResult<()> {
        self.store.remove(&request.id)?;
        tracing::warn!(
            id = %request.id,
            attempts = request.attempts,
            last_error = request.last_error.as_deref().unwrap_or("none"),
            "Discarding queued {} {} ({})",
            request.method,
            request.endpoint,
            reason
        );
        report.discarded.push(DiscardedRequest {
            id: request.id,
            method: request.method,
            endpoint: request.endpoint,
            attempts: request.attempts,
            reason,
            last_error: request.last_error,
        });
        Ok(())
    }
}

fn failure_for(response: &HttpResponse) -> NetworkError {
    NetworkError::from_status(response.status, &response.body_text())
        .unwrap_or(NetworkError::Status(response.status))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentRequest {
        pub method: HttpMethod,
        pub endpoint: String,
        pub body: Option<Vec<u8>>,
    }

    /// Answers from a script, then with 200 once the script runs out.
    #[derive(Default)]
    pub struct ScriptedSender {
        responses: Mutex<VecDeque<Result<HttpResponse, NetworkError>>>,
        sent: Mutex<Vec<SentRequest>>,
        gate: Option<Arc<Notify>>,
        entered: Notify,
    }

    impl ScriptedSender {
        pub fn new(responses: impl IntoIterator<Item = Result<HttpResponse, NetworkError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                ..Self::default()
            }
        }

        /// Every send waits on `gate` before answering.
        pub fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub async fn wait_until_entered(&self) {
            self.entered.notified().await;
        }

        pub fn sent(&self) -> Vec<SentRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestSender for ScriptedSender {
        async fn send(
            &self,
            method: HttpMethod,
            endpoint: &str,
            body: Option<&[u8]>,
        ) -> Result<HttpResponse, NetworkError> {
            self.sent.lock().unwrap().push(SentRequest {
                method,
                endpoint: endpoint.to_string(),
                body: body.map(<[u8]>::to_vec),
            });
            if let Some(gate) = &self.gate {
                self.entered.notify_one();
                gate.notified().await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, Vec::new())))
        }
    }

    /// Queue config with no backoff so every pass attempts every request.
    pub fn immediate_config() -> QueueConfig {
        QueueConfig {
            retry: RetryPolicy {
                backoff: crate::net::BackoffStrategy::Fixed {
                    interval: std::time::Duration::ZERO,
                },
                ..RetryPolicy::aggressive()
            },
            ..QueueConfig::default()
        }
    }
}
