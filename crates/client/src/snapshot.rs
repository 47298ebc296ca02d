#![forbid(unsafe_code)]

use crate::api::{Fetched, TreeApi};
use crate::error::ClientError;
use crate::retry::RetryPolicy;
use simtree_core::ids::TreeId;
use simtree_core::tree::Snapshot;
use std::time::Duration;

/// Fetches the snapshot of `tree`, retrying while the server says it does not exist yet.
///
/// A tree that was just created may not be readable for a short while, so "not found" is
/// retried up to `policy.max_attempts` times. Any other error is returned immediately. When
/// every attempt came back "not found" the result is `Ok(None)`: the tree is still
/// initializing and its nodes will arrive on the tree stream.
pub fn fetch_with_retry<A: TreeApi + ?Sized>(
    api: &A,
    tree: &TreeId,
    policy: &RetryPolicy,
) -> Result<Option<Snapshot>, ClientError> {
    fetch_with_retry_using(api, tree, policy, std::thread::sleep)
}

/// [`fetch_with_retry`] with an injectable sleep.
pub fn fetch_with_retry_using<A, S>(
    api: &A,
    tree: &TreeId,
    policy: &RetryPolicy,
    mut sleep: S,
) -> Result<Option<Snapshot>, ClientError>
where
    A: TreeApi + ?Sized,
    S: FnMut(Duration),
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        match api.fetch_snapshot(tree)? {
            Fetched::Found(snapshot) => {
                tracing::debug!(%tree, attempt, nodes = snapshot.nodes.len(), "snapshot loaded");
                return Ok(Some(snapshot));
            }
            Fetched::NotFound => {
                if attempt + 1 == attempts {
                    break;
                }
                let delay = policy.backoff.delay(attempt);
                tracing::debug!(%tree, attempt, ?delay, "snapshot not found yet; retrying");
                sleep(delay);
            }
        }
    }
    tracing::warn!(%tree, attempts, "snapshot still missing after retries; starting empty");
    Ok(None)
}
