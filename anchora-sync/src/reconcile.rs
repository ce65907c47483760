//! Per-anchor reconciliation decisions
//!
//! Pure functions from (local, remote, cached) state to an action. The
//! orchestrator applies the actions; nothing here touches IO.

use anchora_remote::RemoteTask;
use anchora_vault::TrackedTask;

use crate::cache::RemoteRef;

/// What to do about one anchor this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Local state is authoritative; create or update the remote task
    PushLocal,
    /// Remote state is authoritative; write it into the vault
    PullRemote,
    NoOp,
    /// Both sides changed since the last sync. Resolved remote-wins,
    /// applied like a pull but logged and counted distinctly.
    Conflict,
    /// The pairing is dead (anchor and/or remote task gone); drop the
    /// cache entry without touching either side.
    ForgetLocal,
}

/// Decide for one anchor given a complete view of the remote side.
///
/// A remote tombstone counts as remote-absent.
pub fn decide(
    local: Option<&TrackedTask>,
    remote: Option<&RemoteTask>,
    cached: Option<&RemoteRef>,
) -> SyncDecision {
    let remote = remote.filter(|r| !r.deleted);
    match (local, remote, cached) {
        // Previously-unseen remote task: materialize it locally.
        (None, Some(_), None) => SyncDecision::PullRemote,

        // Brand-new local task, never synced.
        (Some(_), _, None) => SyncDecision::PushLocal,

        (Some(local), Some(remote), Some(cached)) => {
            let local_changed = local.semantic_hash() != cached.hash;
            let remote_changed = remote.last_modified > cached.synced_at;
            match (local_changed, remote_changed) {
                (false, false) => SyncDecision::NoOp,
                (true, false) => SyncDecision::PushLocal,
                (false, true) => SyncDecision::PullRemote,
                (true, true) => SyncDecision::Conflict,
            }
        }

        // Cache entry with a missing side: cleanup candidate.
        (_, _, Some(_)) => SyncDecision::ForgetLocal,

        (None, None, None) => SyncDecision::NoOp,
    }
}

/// [`decide`], adjusted for incremental feeds: a task absent from a delta
/// snapshot is unchanged since the cursor, not gone.
pub fn decide_in_pass(
    local: Option<&TrackedTask>,
    remote: Option<&RemoteTask>,
    cached: Option<&RemoteRef>,
    full_snapshot: bool,
) -> SyncDecision {
    if !full_snapshot && remote.is_none() {
        if let Some(cached) = cached {
            return match local {
                Some(task) if task.semantic_hash() != cached.hash => SyncDecision::PushLocal,
                Some(_) => SyncDecision::NoOp,
                None => SyncDecision::ForgetLocal,
            };
        }
    }
    decide(local, remote, cached)
}
