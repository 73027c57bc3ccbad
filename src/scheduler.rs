//! Single-flight scheduling of drain passes.
//!
//! Every event that might let queued requests through (a new submission,
//! connectivity coming back, a timer) asks the scheduler for a sync. The
//! scheduler guarantees that:
//!
//! - at most one drain pass is executing at any instant
//! - a request arriving while a pass runs is never lost: it schedules
//!   exactly one follow-up pass, however many requests arrive
//!
//! The bookkeeping is an explicit [`SyncState`] with pure transition
//! functions, owned by a [`SyncScheduler`] instance.
//!
//! ## Outcomes
//!
//! [`SyncScheduler::sync_requests`] returns a future for the *run chain* the
//! call started or joined: the pass running at that moment plus every
//! follow-up pass chained after it. The chain fails with the first failure
//! among those passes and succeeds otherwise.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;

use crate::drain::DrainError;

/// One drain pass, as seen by the scheduler.
#[async_trait::async_trait]
pub trait Drain: Send + Sync + 'static {
    async fn drain_once(&self) -> Result<(), DrainError>;
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    /// No pass is executing.
    #[default]
    Idle,
    /// A pass is executing and nothing asked for another one since it began.
    Running,
    /// A pass is executing and another one must follow it.
    RunningWithPendingRerun,
}

/// Effect of a sync request on the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnRequest {
    /// Start a new pass.
    StartDrain,
    /// Attach to the pass already executing.
    Join,
}

/// Effect of a finished pass on the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnComplete {
    /// Start the follow-up pass immediately.
    Rerun,
    /// The chain is over.
    Settle,
}

impl SyncState {
    /// Transition taken when a sync is requested.
    pub fn request(self) -> (SyncState, OnRequest) {
        match self {
            SyncState::Idle => (SyncState::Running, OnRequest::StartDrain),
            SyncState::Running | SyncState::RunningWithPendingRerun => {
                (SyncState::RunningWithPendingRerun, OnRequest::Join)
            }
        }
    }

    /// Transition taken when the executing pass finishes, whatever its
    /// result.
    pub fn complete(self) -> (SyncState, OnComplete) {
        match self {
            SyncState::RunningWithPendingRerun => (SyncState::Running, OnComplete::Rerun),
            SyncState::Running | SyncState::Idle => (SyncState::Idle, OnComplete::Settle),
        }
    }
}

/// Future returned by [`SyncScheduler::sync_requests`].
pub type SyncFuture = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'static>>;

type Outcome = Option<Result<(), SyncError>>;

struct Inner {
    state: SyncState,
    /// Outcome slot for the pass currently executing.
    current: Option<watch::Sender<Outcome>>,
}

/// Owner of the single-flight state for one queue.
///
/// Cloning yields another handle to the same scheduler.
pub struct SyncScheduler<D> {
    drain: Arc<D>,
    inner: Arc<Mutex<Inner>>,
}

impl<D> Clone for SyncScheduler<D> {
    fn clone(&self) -> Self {
        Self {
            drain: Arc::clone(&self.drain),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> SyncScheduler<D>
where
    D: Drain,
{
    pub fn new(drain: D) -> Self {
        Self {
            drain: Arc::new(drain),
            inner: Arc::new(Mutex::new(Inner {
                state: SyncState::Idle,
                current: None,
            })),
        }
    }

    pub fn state(&self) -> SyncState {
        lock(&self.inner).state
    }

    /// Ask for a sync and get a future for the outcome of the run chain.
    ///
    /// The state transition happens immediately; the returned future only
    /// observes. Dropping it does not cancel anything. Must be called from
    /// within a Tokio runtime.
    pub fn sync_requests(&self) -> SyncFuture {
        let receiver = {
            let mut inner = lock(&self.inner);
            let (next, action) = inner.state.request();
            inner.state = next;
            if action == OnRequest::StartDrain {
                let (sender, _) = watch::channel(None);
                inner.current = Some(sender);
                tokio::spawn(run_chain(Arc::clone(&self.drain), Arc::clone(&self.inner)));
                tracing::debug!("Sync started");
            } else {
                tracing::trace!(state = ?next, "Sync coalesced into running pass");
            }
            inner.current.as_ref().map(watch::Sender::subscribe)
        };

        Box::pin(async move {
            let Some(mut receiver) = receiver else {
                return Ok(());
            };
            let outcome = match receiver.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            outcome.unwrap_or_else(|| Err(SyncError::aborted("run chain dropped its outcome")))
        })
    }
}

/// Execute passes until no rerun is pending, then publish outcomes.
///
/// Each pass gets its own outcome slot. A caller that joined pass `i`
/// observes the first failure among passes `i..`, so the slots are filled
/// back to front once the chain settles.
async fn run_chain<D: Drain>(drain: Arc<D>, inner: Arc<Mutex<Inner>>) {
    let mut finished = Vec::new();

    loop {
        let pass = Arc::clone(&drain);
        let result = match tokio::spawn(async move { pass.drain_once().await }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(SyncError::drain(err)),
            Err(join) => Err(SyncError::aborted(join.to_string())),
        };

        let mut guard = lock(&inner);
        let (next, action) = guard.state.complete();
        guard.state = next;
        let slot = match action {
            OnComplete::Rerun => guard.current.replace(watch::channel(None).0),
            OnComplete::Settle => guard.current.take(),
        };
        drop(guard);

        if let Some(slot) = slot {
            finished.push((slot, result));
        }
        if action == OnComplete::Settle {
            break;
        }
        tracing::debug!("Rerunning drain for requests that arrived mid-pass");
    }

    let mut outcome = Ok(());
    for (slot, result) in finished.into_iter().rev() {
        if result.is_err() {
            outcome = result;
        }
        slot.send_replace(Some(outcome.clone()));
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Error observed by callers of [`SyncScheduler::sync_requests`].
///
/// Cheap to clone: every caller attached to a chain receives the same error.
#[derive(Debug, Clone)]
pub struct SyncError {
    kind: SyncErrorKind,
}

/// Sync error kinds.
#[derive(Debug, Clone)]
pub enum SyncErrorKind {
    /// A drain pass stopped on this error.
    Drain(Arc<DrainError>),
    /// A drain pass panicked or was cancelled.
    Aborted(String),
}

impl SyncError {
    fn drain(error: DrainError) -> Self {
        Self {
            kind: SyncErrorKind::Drain(Arc::new(error)),
        }
    }

    fn aborted(reason: impl Into<String>) -> Self {
        Self {
            kind: SyncErrorKind::Aborted(reason.into()),
        }
    }

    pub fn kind(&self) -> &SyncErrorKind {
        &self.kind
    }

    /// The drain error, if a pass failed normally.
    pub fn drain_error(&self) -> Option<&DrainError> {
        match &self.kind {
            SyncErrorKind::Drain(err) => Some(err),
            SyncErrorKind::Aborted(_) => None,
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SyncErrorKind::Drain(err) => write!(f, "Sync failed: {}", err),
            SyncErrorKind::Aborted(reason) => write!(f, "Sync aborted: {}", reason),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            SyncErrorKind::Drain(err) => Some(err.as_ref()),
            SyncErrorKind::Aborted(_) => None,
        }
    }
}
