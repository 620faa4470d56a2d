use std::collections::{BTreeSet, HashMap, HashSet};

use tokio::task::JoinHandle;

use crate::ids::StreamId;
use crate::token::AuthToken;

/// Per-target bookkeeping: which streams are free, which are checked out,
/// and the token/timer indexes that make checkout O(1).
///
/// A `Target` never calls the injector and never reaches for the manager's
/// lock; it only performs the field-level bookkeeping of a state change
/// under the assumption that its own write lock (and, for the methods that
/// touch a specific stream, that stream's write lock) is already held by the
/// caller. [`crate::Manager`] is the only thing that constructs one, wires
/// up the containing `RwLock`, and calls the injector afterward.
#[derive(Default)]
pub(crate) struct Target {
    /// Deterministic-order, sub-linear add/remove/any-pick container. A
    /// `BTreeSet` gives us `pop_first` for "any element" without pulling in
    /// an extra ordered-map dependency; the ordering itself is not a
    /// contract callers may rely on.
    inactive_streams: BTreeSet<StreamId>,
    active_streams: HashSet<StreamId>,
    tokens: HashMap<AuthToken, StreamId>,
    timers: HashMap<StreamId, JoinHandle<()>>,
}

impl Target {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.inactive_streams.len() + self.active_streams.len()
    }

    pub(crate) fn insert_inactive(&mut self, stream_id: StreamId) {
        self.inactive_streams.insert(stream_id);
    }

    pub(crate) fn remove_inactive(&mut self, stream_id: &StreamId) {
        self.inactive_streams.remove(stream_id);
    }

    /// Removes and returns any one element of the inactive set. Which one is
    /// deliberately unspecified beyond "deterministic for this process".
    pub(crate) fn pick_any_inactive(&mut self) -> Option<StreamId> {
        self.inactive_streams.pop_first()
    }

    pub(crate) fn resolve_token(&self, token: &AuthToken) -> Option<StreamId> {
        self.tokens.get(token).cloned()
    }

    pub(crate) fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Records a stream transitioning Inactive -> Active. The caller has
    /// already removed `stream_id` from the inactive set via
    /// [`Target::pick_any_inactive`].
    pub(crate) fn activate(&mut self, stream_id: StreamId, token: AuthToken, timer: JoinHandle<()>) {
        self.tokens.insert(token, stream_id.clone());
        self.timers.insert(stream_id.clone(), timer);
        self.active_streams.insert(stream_id);
    }

    /// Tears down the active-side bookkeeping for `stream_id` (active set,
    /// token map, timer map) and returns the timer handle so the caller can
    /// abort it. Does not touch the inactive set; `remove_stream` and
    /// `deactivate_stream` disagree on whether the stream goes back into it,
    /// so that decision is left to them.
    pub(crate) fn detach_active(
        &mut self,
        stream_id: &StreamId,
        token: &AuthToken,
    ) -> Option<JoinHandle<()>> {
        self.active_streams.remove(stream_id);
        self.tokens.remove(token);
        self.timers.remove(stream_id)
    }

    /// Re-resolves `token` to its stream and swaps in a freshly armed timer,
    /// all under this target's already-held write lock, so the check and the
    /// swap are one atomic step. Used by `reset_active_stream`.
    ///
    /// Returns the old timer to abort on success. If `token` no longer
    /// resolves to an active stream here — it raced a `deactivate_stream` (or
    /// a `remove_stream`) that already unbound it — hands the unarmed new
    /// timer back unchanged so the caller can abort it instead of leaving a
    /// zombie entry in `timers`.
    pub(crate) fn rearm_timer_for_token(
        &mut self,
        token: &AuthToken,
        timer: JoinHandle<()>,
    ) -> Result<JoinHandle<()>, JoinHandle<()>> {
        match self.tokens.get(token) {
            Some(stream_id) => Ok(self
                .timers
                .insert(stream_id.clone(), timer)
                .expect("an active stream's timer must already exist")),
            None => Err(timer),
        }
    }

    pub(crate) fn stats(&self) -> TargetStats {
        TargetStats {
            inactive_count: self.inactive_streams.len(),
            active_count: self.active_streams.len(),
            token_count: self.tokens.len(),
            timer_count: self.timers.len(),
        }
    }
}

/// Point-in-time counts for one target, exposed for diagnostics/health
/// endpoints and for asserting invariant 4 (`|tokens| == |activeStreams| ==
/// |timers|`) from outside the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStats {
    pub inactive_count: usize,
    pub active_count: usize,
    pub token_count: usize,
    pub timer_count: usize,
}
