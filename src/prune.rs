//! Collapsing of superseded idempotent writes.
//!
//! A queued PUT or DELETE is obsolete as soon as a newer PUT or DELETE for
//! the same URL is submitted: only the latest one determines the state of
//! the resource. POST (and every other method) is never pruned and never
//! prunes.

use crate::record::is_idempotent_replace;
use crate::store::QueueStore;

/// Remove every queued PUT/DELETE whose URL equals `url` exactly.
///
/// Must run before the superseding record is inserted, so that record is
/// never removed by its own pruning pass. Returns how many records were
/// dropped.
#[tracing::instrument(skip(store))]
pub async fn prune_superseded_by_url<S>(store: &S, url: &str) -> Result<usize, S::Error>
where
    S: QueueStore,
{
    let mut pruned = 0;
    for stored in store.get_all().await? {
        if stored.request.url() != url || !is_idempotent_replace(stored.request.method()) {
            continue;
        }
        tracing::debug!(id = ?stored.id, method = stored.request.method(), "Pruning superseded request");
        store.delete(stored.id).await?;
        pruned += 1;
    }
    Ok(pruned)
}
