use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::Mutex;

use crate::QueuedRequest;
use crate::store::{QueueStore, StoredRequest};

/// An in-memory queue store for testing or local usage.
///
/// Records live in a `BTreeMap` keyed by a counter that only moves forward,
/// so iteration order is insertion order and ids are never reused. Nothing
/// survives the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    requests: BTreeMap<u64, QueuedRequest>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently queued.
    pub async fn len(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    type Error = std::convert::Infallible;
    type ID = u64;

    async fn add(&self, request: QueuedRequest) -> Result<u64, Self::Error> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.requests.insert(id, request);
        Ok(id)
    }

    async fn get_all(&self) -> Result<Vec<StoredRequest<u64>>, Self::Error> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .iter()
            .map(|(id, request)| StoredRequest::new(*id, request.clone()))
            .collect())
    }

    async fn delete(&self, id: u64) -> Result<(), Self::Error> {
        self.state.lock().await.requests.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> QueuedRequest {
        QueuedRequest::from_parts("POST".into(), url.into(), Vec::new(), b"x".to_vec())
    }

    #[tokio::test]
    async fn returns_records_in_insertion_order() {
        let store = InMemoryStore::new();
        let first = store.add(record("https://example.com/a")).await.unwrap();
        let second = store.add(record("https://example.com/b")).await.unwrap();
        assert!(second > first);

        let all = store.get_all().await.unwrap();
        let urls: Vec<_> = all.iter().map(|r| r.request().url()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let store = InMemoryStore::new();
        let first = store.add(record("https://example.com/a")).await.unwrap();
        store.delete(first).await.unwrap();
        let second = store.add(record("https://example.com/a")).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn deleting_missing_id_is_not_an_error() {
        let store = InMemoryStore::new();
        store.delete(42).await.unwrap();
        assert!(store.is_empty().await);
    }
}
