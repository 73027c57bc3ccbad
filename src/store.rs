//! Durable queue store abstraction and backend drivers.
//!
//! The store is responsible for **durability and ordering** of queued
//! requests. Delivery is handled by the [`drain`](crate::drain) engine and
//! scheduling by the [`scheduler`](crate::scheduler).
//!
//! ## Contract
//!
//! - [`QueueStore::add`] appends a record and returns a unique, increasing id
//!   that is never reused
//! - [`QueueStore::get_all`] returns every record in insertion order
//! - [`QueueStore::delete`] removes a record; deleting an id that is already
//!   gone succeeds, since pruning and draining may both target one record
//!
//! Concrete implementations are provided by [`inmemory`] and [`sqlite`]
//! (feature-gated).

pub mod inmemory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use inmemory::InMemoryStore;

use crate::QueuedRequest;

/// A record as held by the store, together with its store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRequest<ID> {
    pub(crate) id: ID,
    pub(crate) request: QueuedRequest,
}

impl<ID> StoredRequest<ID> {
    pub fn new(id: ID, request: QueuedRequest) -> Self {
        Self { id, request }
    }

    pub fn request(&self) -> &QueuedRequest {
        &self.request
    }
}

/// Ordered, keyed persistence for queued requests.
///
/// Implementations are cheap handles (typically wrapping a pool or an
/// `Arc`) and are cloned into the drain engine and the queue façade.
#[async_trait::async_trait]
pub trait QueueStore: Clone + Send + Sync + 'static {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError> + Send;
    /// Identifier type assigned to stored records.
    type ID: Clone + std::fmt::Debug + Send + Sync;

    /// Append a record at the tail of the queue.
    async fn add(&self, request: QueuedRequest) -> Result<Self::ID, Self::Error>;

    /// Snapshot every queued record, oldest first.
    async fn get_all(&self) -> Result<Vec<StoredRequest<Self::ID>>, Self::Error>;

    /// Remove a record by id.
    async fn delete(&self, id: Self::ID) -> Result<(), Self::Error>;
}
