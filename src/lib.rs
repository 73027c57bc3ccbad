#![doc = include_str!("../README.md")]

pub mod drain;
pub mod notify;
pub mod prune;
mod queue;
pub mod record;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod trigger;

#[doc(inline)]
pub use record::{CodecError, CodecErrorKind, QueuedRequest};

#[doc(inline)]
pub use queue::{
    Acknowledgement, ListError, RequestQueue, RequestQueueBuilder, SubmitError, SubmitErrorKind,
    suppress_sync_error,
};

#[doc(inline)]
pub use scheduler::{Drain, SyncError, SyncErrorKind, SyncFuture, SyncScheduler, SyncState};

#[doc(inline)]
pub use drain::{
    ClientErrorPolicy, DefaultDrainHook, DrainEngine, DrainError, DrainErrorKind, DrainHook,
};

#[doc(inline)]
pub use notify::{Completion, Notifier};

#[doc(inline)]
pub use transport::{Transport, TransportError, TransportErrorKind};

#[doc(inline)]
pub use trigger::{DEFAULT_SYNC_INTERVAL, PeriodicTriggerBuilder, Trigger};
