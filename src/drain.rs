//! Drain engine delivering queued requests through a transport.
//!
//! One drain pass:
//!
//! - Snapshots the store, oldest request first
//! - Rebuilds and delivers each request in turn
//! - Removes every request that reached a terminal response
//! - Stops at the first failure, leaving that request and everything after
//!   it queued for a later pass
//!
//! A transport error and a `5xx` response are the same thing here: the
//! server did not take the write, so nothing behind it may go out either.
//! Everything below 500 is terminal. What happens to `4xx` responses is
//! decided by [`ClientErrorPolicy`].
//!
//! Passes must not overlap; the [`SyncScheduler`](crate::SyncScheduler)
//! guarantees that.

use std::sync::Arc;

use reqwest::StatusCode;
use tower::Service;

use crate::notify::{Completion, Notifier};
use crate::scheduler::Drain;
use crate::store::QueueStore;
use crate::transport::{Transport, TransportError};
use crate::{CodecError, QueuedRequest};

/// What to do with a request the server answered with `4xx`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientErrorPolicy {
    /// Drop the request as if it had been delivered.
    ///
    /// A request the server refuses will be refused again; keeping it would
    /// block everything queued behind it forever.
    #[default]
    Discard,
    /// Keep the request and stop the pass, exactly like a `5xx`.
    Retain,
}

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Delivered,
    Discarded,
    Deferred,
}

fn classify(status: StatusCode, policy: ClientErrorPolicy) -> Verdict {
    if status.as_u16() >= 500 {
        Verdict::Deferred
    } else if status.is_client_error() {
        match policy {
            ClientErrorPolicy::Discard => Verdict::Discarded,
            ClientErrorPolicy::Retain => Verdict::Deferred,
        }
    } else {
        Verdict::Delivered
    }
}

/// Sequential, stop-on-first-failure delivery of the queue.
///
/// Generic parameters:
/// - `S`: Queue store
/// - `T`: Transport service type
/// - `HK`: Hook implementation for lifecycle events
pub struct DrainEngine<S, T, HK = DefaultDrainHook> {
    store: S,
    transport: Transport<T>,
    hook: HK,
    notifier: Option<Arc<dyn Notifier>>,
    client_errors: ClientErrorPolicy,
}

impl<S, T> DrainEngine<S, T, DefaultDrainHook> {
    /// Create a new engine with the default hook implementation.
    pub fn new(store: S, transport: Transport<T>) -> Self {
        Self {
            store,
            transport,
            hook: DefaultDrainHook,
            notifier: None,
            client_errors: ClientErrorPolicy::default(),
        }
    }
}

impl<S, T, HK> DrainEngine<S, T, HK> {
    /// Replace the hook while keeping all other generics unchanged.
    pub fn with_hook<HK2: DrainHook>(self, hook: HK2) -> DrainEngine<S, T, HK2> {
        DrainEngine {
            store: self.store,
            transport: self.transport,
            hook,
            notifier: self.notifier,
            client_errors: self.client_errors,
        }
    }

    /// Report every request that leaves the queue after a response.
    pub fn with_notifier(mut self, notifier: impl Notifier) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    pub fn with_client_error_policy(mut self, policy: ClientErrorPolicy) -> Self {
        self.client_errors = policy;
        self
    }
}

impl<S, T, HK> DrainEngine<S, T, HK>
where
    S: QueueStore,
    T: Service<reqwest::Request, Response = reqwest::Response> + Clone + Send + Sync + 'static,
    T::Future: Send + 'static,
    T::Error: Into<tower::BoxError>,
    HK: DrainHook,
{
    /// Run one drain pass over the current queue.
    #[tracing::instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<(), DrainError> {
        let queued = self.store.get_all().await.map_err(|e| self.store_error(e))?;
        self.hook.on_drain_start(queued.len());

        for stored in queued {
            self.hook.on_next_request(&stored.request);

            let request = match stored.request.decode() {
                Ok(request) => request,
                Err(err) => {
                    self.hook.on_undecodable_request(&stored.request, &err);
                    self.store
                        .delete(stored.id)
                        .await
                        .map_err(|e| self.store_error(e))?;
                    continue;
                }
            };

            let response = match self.transport.deliver(request).await {
                Ok(response) => response,
                Err(err) => {
                    let err = DrainError::transport(err);
                    self.hook.on_delivery_deferred(&stored.request, &err);
                    return Err(err);
                }
            };

            let status = response.status();
            match classify(status, self.client_errors) {
                Verdict::Delivered => self.hook.on_request_delivered(&stored.request, status),
                Verdict::Discarded => self.hook.on_request_discarded(&stored.request, status),
                Verdict::Deferred => {
                    let err = DrainError::status(status);
                    self.hook.on_delivery_deferred(&stored.request, &err);
                    return Err(err);
                }
            }

            self.store
                .delete(stored.id)
                .await
                .map_err(|e| self.store_error(e))?;

            if let Some(notifier) = &self.notifier {
                notifier.notify(Completion {
                    request: stored.request,
                    status,
                    headers: response.headers().clone(),
                });
            }
        }

        self.hook.on_drain_complete();
        Ok(())
    }

    fn store_error(&self, err: S::Error) -> DrainError {
        let err = DrainError::store(err.into());
        self.hook.on_store_error(&err);
        err
    }
}

#[async_trait::async_trait]
impl<S, T, HK> Drain for DrainEngine<S, T, HK>
where
    S: QueueStore,
    T: Service<reqwest::Request, Response = reqwest::Response> + Clone + Send + Sync + 'static,
    T::Future: Send + 'static,
    T::Error: Into<tower::BoxError>,
    HK: DrainHook,
{
    async fn drain_once(&self) -> Result<(), DrainError> {
        DrainEngine::drain_once(self).await
    }
}

/// Error that ended a drain pass.
#[derive(Debug)]
pub struct DrainError {
    context: tracing_error::SpanTrace,
    kind: DrainErrorKind,
}

/// Classification of drain errors.
#[derive(Debug)]
pub enum DrainErrorKind {
    /// The store could not be read or updated.
    Store(tower::BoxError),
    /// The request never got a response.
    Transport(TransportError),
    /// The server answered `5xx`.
    Server(StatusCode),
    /// The server answered `4xx` and the policy keeps such requests.
    Rejected(StatusCode),
}

impl DrainError {
    pub(crate) fn store(error: tower::BoxError) -> Self {
        Self::new(DrainErrorKind::Store(error))
    }

    pub(crate) fn transport(error: TransportError) -> Self {
        Self::new(DrainErrorKind::Transport(error))
    }

    pub(crate) fn status(status: StatusCode) -> Self {
        if status.is_client_error() {
            Self::new(DrainErrorKind::Rejected(status))
        } else {
            Self::new(DrainErrorKind::Server(status))
        }
    }

    fn new(kind: DrainErrorKind) -> Self {
        Self {
            context: tracing_error::SpanTrace::capture(),
            kind,
        }
    }

    pub fn kind(&self) -> &DrainErrorKind {
        &self.kind
    }

    /// Whether this is the ordinary "server unreachable or unwell" condition
    /// that the next pass is expected to get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DrainErrorKind::Transport(_) | DrainErrorKind::Server(_)
        )
    }
}

impl std::fmt::Display for DrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            DrainErrorKind::Store(err) => writeln!(f, "Store error: {}", err),
            DrainErrorKind::Transport(err) => writeln!(f, "Transport error: {}", err),
            DrainErrorKind::Server(status) => writeln!(f, "HTTP Error {} received", status),
            DrainErrorKind::Rejected(status) => writeln!(f, "Request rejected with {}", status),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for DrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            DrainErrorKind::Store(err) => Some(err.as_ref()),
            DrainErrorKind::Transport(err) => Some(err),
            DrainErrorKind::Server(_) | DrainErrorKind::Rejected(_) => None,
        }
    }
}

/// Hook trait for observing drain lifecycle events.
///
/// Hooks are invoked synchronously and should avoid heavy or blocking work.
/// Typical use cases include logging, metrics, and tracing integration.
pub trait DrainHook: Send + Sync + 'static {
    fn on_drain_start(&self, queued: usize);
    fn on_next_request(&self, request: &QueuedRequest);
    fn on_request_delivered(&self, request: &QueuedRequest, status: StatusCode);
    fn on_request_discarded(&self, request: &QueuedRequest, status: StatusCode);
    fn on_delivery_deferred(&self, request: &QueuedRequest, error: &DrainError);
    fn on_undecodable_request(&self, request: &QueuedRequest, error: &CodecError);
    fn on_store_error(&self, error: &DrainError);
    fn on_drain_complete(&self);
}

/// Default drain hook implementation.
///
/// Logs lifecycle events using `tracing`. Deferred deliveries are the normal
/// offline condition and are not logged as errors.
pub struct DefaultDrainHook;

impl DrainHook for DefaultDrainHook {
    fn on_drain_start(&self, queued: usize) {
        tracing::debug!(queued, "Drain pass starting");
    }

    fn on_next_request(&self, request: &QueuedRequest) {
        tracing::debug!(method = request.method(), url = request.url(), "Delivering request");
    }

    fn on_request_delivered(&self, request: &QueuedRequest, status: StatusCode) {
        tracing::info!(
            method = request.method(),
            url = request.url(),
            %status,
            "Request delivered"
        );
    }

    fn on_request_discarded(&self, request: &QueuedRequest, status: StatusCode) {
        tracing::warn!(
            method = request.method(),
            url = request.url(),
            %status,
            "Request rejected by server, dropping it from the queue"
        );
    }

    fn on_delivery_deferred(&self, request: &QueuedRequest, error: &DrainError) {
        tracing::info!(
            method = request.method(),
            url = request.url(),
            error = ?error.kind(),
            "Delivery deferred, request stays queued"
        );
    }

    fn on_undecodable_request(&self, request: &QueuedRequest, error: &CodecError) {
        tracing::warn!(
            method = request.method(),
            url = request.url(),
            ?error,
            "Queued request cannot be rebuilt, dropping it"
        );
    }

    fn on_store_error(&self, error: &DrainError) {
        tracing::error!(?error, "Queue store failed during drain");
    }

    fn on_drain_complete(&self) {
        tracing::debug!("Drain pass complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::transport::InMemory;
    use tokio::sync::broadcast;

    async fn queue(store: &InMemoryStore, method: &str, url: &str, body: &str) {
        let request = reqwest::Client::new()
            .request(method.parse().unwrap(), url)
            .body(body.to_owned())
            .build()
            .unwrap();
        store
            .add(QueuedRequest::encode(&request).unwrap())
            .await
            .unwrap();
    }

    fn urls(requests: &[reqwest::Request]) -> Vec<String> {
        requests.iter().map(|r| r.url().path().to_owned()).collect()
    }

    #[test]
    fn classifies_statuses() {
        let discard = ClientErrorPolicy::Discard;
        let retain = ClientErrorPolicy::Retain;

        assert_eq!(classify(StatusCode::OK, discard), Verdict::Delivered);
        assert_eq!(classify(StatusCode::NO_CONTENT, retain), Verdict::Delivered);
        assert_eq!(classify(StatusCode::FOUND, discard), Verdict::Delivered);
        assert_eq!(classify(StatusCode::NOT_FOUND, discard), Verdict::Discarded);
        assert_eq!(classify(StatusCode::NOT_FOUND, retain), Verdict::Deferred);
        assert_eq!(classify(StatusCode::INTERNAL_SERVER_ERROR, discard), Verdict::Deferred);
        assert_eq!(classify(StatusCode::SERVICE_UNAVAILABLE, retain), Verdict::Deferred);
    }

    #[tokio::test]
    async fn delivers_in_order_and_empties_queue() {
        let store = InMemoryStore::new();
        let transport = InMemory::online();
        for path in ["/a", "/b", "/c"] {
            queue(&store, "POST", &format!("https://x.test{path}"), "1").await;
        }

        let engine = DrainEngine::new(store.clone(), Transport::new(transport.clone()));
        engine.drain_once().await.unwrap();

        assert!(store.is_empty().await);
        assert_eq!(urls(&transport.take_requests()), vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn stops_at_first_transport_failure() {
        let store = InMemoryStore::new();
        let transport = InMemory::offline();
        queue(&store, "PUT", "https://x.test/a", "1").await;
        queue(&store, "PUT", "https://x.test/b", "2").await;

        let engine = DrainEngine::new(store.clone(), Transport::new(transport.clone()));
        let err = engine.drain_once().await.unwrap_err();

        assert!(err.is_retryable());
        assert!(matches!(err.kind(), DrainErrorKind::Transport(_)));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn server_error_is_a_failure() {
        let store = InMemoryStore::new();
        let transport = InMemory::online();
        transport.respond_with(StatusCode::BAD_GATEWAY);
        queue(&store, "PUT", "https://x.test/a", "1").await;
        queue(&store, "PUT", "https://x.test/b", "2").await;

        let engine = DrainEngine::new(store.clone(), Transport::new(transport.clone()));
        let err = engine.drain_once().await.unwrap_err();

        assert!(matches!(err.kind(), DrainErrorKind::Server(StatusCode::BAD_GATEWAY)));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn client_errors_follow_policy() {
        let store = InMemoryStore::new();
        let transport = InMemory::online();
        transport.respond_with(StatusCode::UNPROCESSABLE_ENTITY);
        queue(&store, "POST", "https://x.test/a", "1").await;

        let retaining = DrainEngine::new(store.clone(), Transport::new(transport.clone()))
            .with_client_error_policy(ClientErrorPolicy::Retain);
        let err = retaining.drain_once().await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(store.len().await, 1);

        let discarding = DrainEngine::new(store.clone(), Transport::new(transport.clone()));
        discarding.drain_once().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn notifies_each_completed_request() {
        let store = InMemoryStore::new();
        let transport = InMemory::online();
        transport.respond_with(StatusCode::OK);
        queue(&store, "PUT", "https://x.test/items/1", "x").await;

        let (tx, mut rx) = broadcast::channel(8);
        let engine =
            DrainEngine::new(store.clone(), Transport::new(transport)).with_notifier(tx);
        engine.drain_once().await.unwrap();

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.request.method(), "PUT");
        assert_eq!(completion.request.url(), "https://x.test/items/1");
        assert_eq!(completion.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn undecodable_records_are_dropped() {
        let store = InMemoryStore::new();
        let transport = InMemory::online();
        store
            .add(QueuedRequest::from_parts(
                "PUT".into(),
                "::not a url::".into(),
                Vec::new(),
                Vec::new(),
            ))
            .await
            .unwrap();
        queue(&store, "PUT", "https://x.test/ok", "1").await;

        let engine = DrainEngine::new(store.clone(), Transport::new(transport.clone()));
        engine.drain_once().await.unwrap();

        assert!(store.is_empty().await);
        assert_eq!(urls(&transport.take_requests()), vec!["/ok"]);
    }
}
