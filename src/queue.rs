//! Public entry point: a durable, self-draining request queue.
//!
//! [`RequestQueue`] ties together a [`QueueStore`], a [`DrainEngine`] and a
//! [`SyncScheduler`]. Submitting a request only promises that it is
//! *durably queued*; delivery happens in the background and is retried on
//! every later sync until the server takes it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use courier::{RequestQueue, store::InMemoryStore, transport::Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = reqwest::Client::new();
//! let queue = RequestQueue::builder(InMemoryStore::new(), Transport::new(client.clone())).build();
//!
//! let request = client.put("https://example.com/items/1").body("x").build()?;
//! let ack = queue.submit(&request).await?;
//! assert_eq!(ack.status(), reqwest::StatusCode::ACCEPTED);
//!
//! // Later, e.g. when connectivity returns:
//! queue.sync_requests().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::instrument;
use tracing_error::SpanTrace;

use crate::drain::{ClientErrorPolicy, DefaultDrainHook, DrainEngine, DrainHook};
use crate::notify::Notifier;
use crate::prune::prune_superseded_by_url;
use crate::scheduler::{SyncError, SyncFuture, SyncScheduler};
use crate::store::QueueStore;
use crate::transport::Transport;
use crate::trigger::Trigger;
use crate::{CodecError, QueuedRequest};

/// A durable, ordered, self-draining queue of outbound requests.
///
/// Cloning yields another handle to the same queue and scheduler.
pub struct RequestQueue<S, T, HK = DefaultDrainHook> {
    store: S,
    scheduler: SyncScheduler<DrainEngine<S, T, HK>>,
    /// Serializes prune + insert so concurrent submissions cannot interleave.
    enqueue: Arc<Mutex<()>>,
}

impl<S, T, HK> Clone for RequestQueue<S, T, HK>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            enqueue: Arc::clone(&self.enqueue),
        }
    }
}

impl<S, T> RequestQueue<S, T, DefaultDrainHook>
where
    S: Clone,
{
    /// Start configuring a queue over `store`, delivering through `transport`.
    pub fn builder(store: S, transport: Transport<T>) -> RequestQueueBuilder<S, T> {
        RequestQueueBuilder {
            engine: DrainEngine::new(store.clone(), transport),
            store,
        }
    }
}

/// Builder for [`RequestQueue`].
pub struct RequestQueueBuilder<S, T, HK = DefaultDrainHook> {
    store: S,
    engine: DrainEngine<S, T, HK>,
}

impl<S, T, HK> RequestQueueBuilder<S, T, HK> {
    /// Replace the drain hook.
    pub fn hook<HK2: DrainHook>(self, hook: HK2) -> RequestQueueBuilder<S, T, HK2> {
        RequestQueueBuilder {
            store: self.store,
            engine: self.engine.with_hook(hook),
        }
    }

    /// Report every request that leaves the queue after a response.
    pub fn notifier(mut self, notifier: impl Notifier) -> Self {
        self.engine = self.engine.with_notifier(notifier);
        self
    }

    /// Decide what happens to requests the server answers with `4xx`.
    ///
    /// Defaults to [`ClientErrorPolicy::Discard`].
    pub fn client_error_policy(mut self, policy: ClientErrorPolicy) -> Self {
        self.engine = self.engine.with_client_error_policy(policy);
        self
    }
}

impl<S, T, HK> RequestQueueBuilder<S, T, HK>
where
    S: QueueStore,
    T: Service<reqwest::Request, Response = reqwest::Response> + Clone + Send + Sync + 'static,
    T::Future: Send + 'static,
    T::Error: Into<tower::BoxError>,
    HK: DrainHook,
{
    pub fn build(self) -> RequestQueue<S, T, HK> {
        RequestQueue {
            store: self.store,
            scheduler: SyncScheduler::new(self.engine),
            enqueue: Arc::new(Mutex::new(())),
        }
    }
}

impl<S, T, HK> RequestQueue<S, T, HK>
where
    S: QueueStore,
    T: Service<reqwest::Request, Response = reqwest::Response> + Clone + Send + Sync + 'static,
    T::Future: Send + 'static,
    T::Error: Into<tower::BoxError>,
    HK: DrainHook,
{
    /// Durably queue a request and kick off a background sync.
    ///
    /// The caller's request is only read, never consumed. A PUT or DELETE
    /// first drops every queued PUT/DELETE for the same URL. The returned
    /// acknowledgement says nothing about delivery: it is produced as soon
    /// as the request is stored, even if the server is unreachable.
    #[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    pub async fn submit(&self, request: &reqwest::Request) -> Result<Acknowledgement, SubmitError> {
        let record = QueuedRequest::encode(request).map_err(SubmitError::encoding)?;

        {
            let _guard = self.enqueue.lock().await;
            if record.is_idempotent_replace() {
                let pruned = prune_superseded_by_url(&self.store, record.url())
                    .await
                    .map_err(|e| SubmitError::store(e.into()))?;
                if pruned > 0 {
                    tracing::debug!(pruned, "Superseded requests removed");
                }
            }
            let id = self
                .store
                .add(record)
                .await
                .map_err(|e| SubmitError::store(e.into()))?;
            tracing::debug!(?id, "Request queued");
        }

        self.request_sync();
        Ok(Acknowledgement::accepted())
    }

    /// Snapshot of every queued request, oldest first.
    ///
    /// Each returned request is a fresh copy; sending one does not remove it
    /// from the queue. Records that can no longer be rebuilt are left out;
    /// the next drain discards them.
    pub async fn list_queued(&self) -> Result<Vec<reqwest::Request>, ListError> {
        let queued = self
            .store
            .get_all()
            .await
            .map_err(|e| ListError::store(e.into()))?
            .into_iter()
            .filter_map(|stored| match stored.request().decode() {
                Ok(request) => Some(request),
                Err(error) => {
                    tracing::warn!(
                        id = ?stored.id,
                        method = stored.request().method(),
                        url = stored.request().url(),
                        ?error,
                        "Queued request cannot be rebuilt, leaving it out of the listing"
                    );
                    None
                }
            })
            .collect();
        Ok(queued)
    }

    /// Trigger a sync and wait for the run chain it started or joined.
    pub fn sync_requests(&self) -> SyncFuture {
        self.scheduler.sync_requests()
    }

    /// Trigger a sync without waiting for it.
    ///
    /// Failures are expected (being offline is the normal reason) and are
    /// swallowed by [`suppress_sync_error`]; the requests stay queued.
    pub fn request_sync(&self) -> JoinHandle<()> {
        spawn_detached(self.sync_requests())
    }

    /// Request a sync every `interval` until `cancel` fires.
    ///
    /// The first sync runs immediately.
    pub fn sync_periodically(&self, interval: Duration, cancel: CancellationToken) -> Trigger {
        let queue = self.clone();
        Trigger::periodic(interval, cancel, move || {
            queue.request_sync();
        })
    }

    /// Request a sync for every item of `events`, typically "back online"
    /// notifications from the host.
    pub fn sync_on_events<St>(&self, events: St, cancel: CancellationToken) -> Trigger
    where
        St: Stream + Unpin + Send + 'static,
    {
        let queue = self.clone();
        Trigger::on_events(events, cancel, move || {
            queue.request_sync();
        })
    }
}

/// Run a sync future to completion in the background, never propagating
/// its error.
pub(crate) fn spawn_detached(sync: SyncFuture) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = sync.await {
            suppress_sync_error(&err);
        }
    })
}

/// Error handler for detached syncs: log and move on.
pub fn suppress_sync_error(err: &SyncError) {
    match err.drain_error() {
        Some(drain) if drain.is_retryable() => {
            tracing::debug!("Background sync deferred; requests remain queued")
        }
        _ => tracing::warn!(error = %err, "Background sync failed; requests remain queued"),
    }
}

/// Response returned by [`RequestQueue::submit`] once a request is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    status: StatusCode,
}

impl Acknowledgement {
    pub const REASON: &'static str = "Added to Queue";

    fn accepted() -> Self {
        Self {
            status: StatusCode::ACCEPTED,
        }
    }

    /// Always `202 Accepted`.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &'static str {
        Self::REASON
    }
}

/// An empty-bodied `202 Accepted` response, for handing back to code that
/// expects the shape of a real HTTP response.
impl From<Acknowledgement> for reqwest::Response {
    fn from(ack: Acknowledgement) -> Self {
        let mut response = http::Response::new(Vec::<u8>::new());
        *response.status_mut() = ack.status;
        reqwest::Response::from(response)
    }
}

/// Error returned when a request could not be queued. Nothing was stored.
#[derive(Debug)]
pub struct SubmitError {
    context: SpanTrace,
    kind: SubmitErrorKind,
}

/// Classification of submit errors.
#[derive(Debug)]
pub enum SubmitErrorKind {
    /// The request could not be captured.
    Encoding(CodecError),
    /// The store failed while pruning or inserting.
    Store(tower::BoxError),
}

impl SubmitError {
    fn encoding(error: CodecError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: SubmitErrorKind::Encoding(error),
        }
    }

    fn store(error: tower::BoxError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: SubmitErrorKind::Store(error),
        }
    }

    pub fn kind(&self) -> &SubmitErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SubmitErrorKind::Encoding(err) => writeln!(f, "Encoding error: {}", err),
            SubmitErrorKind::Store(err) => writeln!(f, "Store error: {}", err),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            SubmitErrorKind::Encoding(err) => Some(err),
            SubmitErrorKind::Store(err) => Some(err.as_ref()),
        }
    }
}

/// Error returned by [`RequestQueue::list_queued`].
#[derive(Debug)]
pub struct ListError {
    context: SpanTrace,
    source: tower::BoxError,
}

impl ListError {
    fn store(error: tower::BoxError) -> Self {
        Self {
            context: SpanTrace::capture(),
            source: error,
        }
    }
}

impl std::fmt::Display for ListError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cannot list queued requests: {}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ListError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
