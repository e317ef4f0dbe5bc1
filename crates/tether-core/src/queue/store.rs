//! Queue persistence trait and in-memory backend

use std::sync::Mutex;

use super::request::{QueuedRequest, RequestId};
use super::{QueueError, QueueResult};

/// Durable home for queued requests.
///
/// `list` returns requests in creation order. `update` and `remove` on an
/// unknown ID are no-ops.
pub trait QueueStore: Send + Sync + 'static {
    fn insert(&self, request: &QueuedRequest) -> QueueResult<()>;

    fn update(&self, request: &QueuedRequest) -> QueueResult<()>;

    fn remove(&self, id: &RequestId) -> QueueResult<()>;

    fn list(&self) -> QueueResult<Vec<QueuedRequest>>;

    fn count(&self) -> QueueResult<usize>;
}

#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    requests: Mutex<Vec<QueuedRequest>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, Vec<QueuedRequest>>> {
        self.requests.lock().map_err(|_| QueueError::Poisoned)
    }
}

impl QueueStore for MemoryQueueStore {
    fn insert(&self, request: &QueuedRequest) -> QueueResult<()> {
        let mut requests = self.lock()?;
        let position = requests
            .iter()
            .position(|existing| existing.created_at > request.created_at)
            .unwrap_or(requests.len());
        requests.insert(position, request.clone());
        Ok(())
    }

    fn update(&self, request: &QueuedRequest) -> QueueResult<()> {
        let mut requests = self.lock()?;
        if let Some(existing) = requests.iter_mut().find(|existing| existing.id == request.id) {
            *existing = request.clone();
        }
        Ok(())
    }

    fn remove(&self, id: &RequestId) -> QueueResult<()> {
        self.lock()?.retain(|existing| existing.id != *id);
        Ok(())
    }

    fn list(&self) -> QueueResult<Vec<QueuedRequest>> {
        Ok(self.lock()?.clone())
    }

    fn count(&self) -> QueueResult<usize> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::net::HttpMethod;

    #[test]
    fn list_is_creation_ordered() {
        let store = MemoryQueueStore::new();
        let late = QueuedRequest::new("/late", HttpMethod::Post, None);
        let mut early = QueuedRequest::new("/early", HttpMethod::Post, None);
        early.created_at = late.created_at - TimeDelta::seconds(30);

        store.insert(&late).unwrap();
        store.insert(&early).unwrap();

        let endpoints: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|request| request.endpoint)
            .collect();
        assert_eq!(endpoints, vec!["/early", "/late"]);
    }

    #[test]
    fn update_and_remove() {
        let store = MemoryQueueStore::new();
        let mut request = QueuedRequest::new("/v1/notes", HttpMethod::Put, Some(b"{}".to_vec()));
        store.insert(&request).unwrap();

        request.attempts = 2;
        store.update(&request).unwrap();
        assert_eq!(store.list().unwrap()[0].attempts, 2);

        store.remove(&request.id).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        // Unknown IDs are ignored.
        store.remove(&request.id).unwrap();
        store.update(&request).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
