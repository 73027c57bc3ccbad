//! Environment triggers that ask for a sync.
//!
//! Triggers are fire-and-forget: they call a closure (usually
//! [`RequestQueue::request_sync`](crate::RequestQueue::request_sync)) and
//! never wait for the outcome. Two sources are provided:
//!
//! - a periodic timer ([`PeriodicTriggerBuilder`])
//! - an event stream, e.g. "connectivity restored" notifications
//!   ([`Trigger::on_events`])
//!
//! Both run as background tasks until their [`CancellationToken`] fires.

use std::time::Duration;

use futures_core::Stream;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;

/// Interval used when the host does not pick one.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle to a running trigger task.
///
/// Dropping the handle does not stop the task; cancel its token instead.
pub struct Trigger {
    handle: JoinHandle<()>,
}

impl Trigger {
    /// Fire every `interval`, starting immediately.
    ///
    /// Shorthand for [`PeriodicTriggerBuilder::new`] followed by `start`.
    pub fn periodic<F>(interval: Duration, cancel: CancellationToken, fire: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        PeriodicTriggerBuilder::new(interval).start(cancel, fire)
    }

    /// Fire once for every item produced by `events`.
    ///
    /// Stops when the stream ends or `cancel` fires.
    pub fn on_events<St, F>(events: St, cancel: CancellationToken, mut fire: F) -> Self
    where
        St: Stream + Unpin + Send + 'static,
        F: FnMut() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut events = events;
            loop {
                tokio::select! {
                    event = events.next() => match event {
                        Some(_) => {
                            tracing::debug!("Sync event received");
                            fire();
                        }
                        None => return,
                    },
                    _ = cancel.cancelled() => return,
                }
            }
        });

        Self { handle }
    }

    /// Wait for the trigger task to finish.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            tracing::warn!(?err, "Trigger task ended abnormally");
        }
    }
}

/// Builder for a periodic trigger.
pub struct PeriodicTriggerBuilder {
    interval: Duration,
    fire_immediately: bool,
}

impl PeriodicTriggerBuilder {
    /// Create a builder firing every `interval`.
    ///
    /// By default the first tick fires right away, which drains whatever a
    /// previous process left in a durable store.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            fire_immediately: true,
        }
    }

    /// Wait one full interval before the first tick.
    pub fn delay_first_tick(mut self) -> Self {
        self.fire_immediately = false;
        self
    }

    /// Start the timer in the background.
    pub fn start<F>(self, cancel: CancellationToken, mut fire: F) -> Trigger
    where
        F: FnMut() + Send + 'static,
    {
        let interval = self.interval;
        let fire_immediately = self.fire_immediately;

        let handle = tokio::spawn(async move {
            let mut ticker = if fire_immediately {
                tokio::time::interval(interval)
            } else {
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval)
            };
            // A host that slept through several ticks needs one sync, not a burst.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::debug!("Periodic sync tick");
                        fire();
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });

        Trigger { handle }
    }
}

impl Default for PeriodicTriggerBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_INTERVAL)
    }
}
