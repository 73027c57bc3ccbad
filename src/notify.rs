//! Completion notifications.
//!
//! After the drain engine removes a delivered request it tells an optional
//! [`Notifier`] about it. Notification is best-effort: a notifier must not
//! block, and nothing it does can fail the drain.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::sync::broadcast;

use crate::QueuedRequest;

/// A queued request reached a terminal response and left the queue.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The request as it was queued.
    pub request: QueuedRequest,
    /// Status of the response that ended it.
    pub status: StatusCode,
    /// Headers of that response.
    pub headers: HeaderMap,
}

/// Receiver of completion notifications.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, completion: Completion);
}

/// Fan completions out to every live subscriber.
///
/// Having no subscribers is not an error; the completion is dropped.
impl Notifier for broadcast::Sender<Completion> {
    fn notify(&self, completion: Completion) {
        if self.send(completion).is_err() {
            tracing::trace!("No completion subscribers");
        }
    }
}

/// Discards every completion.
impl Notifier for () {
    fn notify(&self, _completion: Completion) {}
}
