use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::error::{Error, InvalidTokenKind, Result};
use crate::ids::{StreamId, TargetId};
use crate::injector::{DeactivatedStream, Injector};
use crate::stream::{ActiveStream, Stream};
use crate::target::{Target, TargetStats};
use crate::token::AuthToken;

/// Everything guarded by the manager's single reader/writer lock: the
/// target registry and the global stream-id index. Kept as one struct
/// rather than two locks so the "manager read lock"/"manager write lock"
/// language in the design matches a single `RwLock` in code.
struct ManagerState {
    targets: HashMap<TargetId, Arc<RwLock<Target>>>,
    streams: HashMap<StreamId, Arc<RwLock<Stream>>>,
}

struct Inner {
    state: RwLock<ManagerState>,
    injector: Arc<dyn Injector>,
    expiration_window: Duration,
}

/// Registry and activation engine for streams grouped by target.
///
/// `Manager` is cheap to clone (it's an `Arc` around its state) and is
/// typically constructed once per process. All public operations take the
/// manager lock first and release every lock they acquire before returning;
/// see the module-level lock-hierarchy discussion in the crate docs for the
/// acquisition order (manager -> target -> stream) this type depends on.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    #[must_use]
    pub fn new(injector: Arc<dyn Injector>, expiration_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(ManagerState {
                    targets: HashMap::new(),
                    streams: HashMap::new(),
                }),
                injector,
                expiration_window,
            }),
        }
    }

    /// Registers a freshly constructed stream under its target, creating the
    /// target if this is its first stream.
    pub async fn add_stream(&self, stream: Stream) -> Result<()> {
        let stream_id = stream.stream_id.clone();
        let target_id = stream.target_id.clone();

        let mut state = self.inner.state.write();
        if state.streams.contains_key(&stream_id) {
            return Err(Error::AlreadyExists(stream_id.to_string()));
        }

        let target_arc = state
            .targets
            .entry(target_id)
            .or_insert_with(|| Arc::new(RwLock::new(Target::new())))
            .clone();
        state.streams.insert(stream_id.clone(), Arc::new(RwLock::new(stream)));
        target_arc.write().insert_inactive(stream_id);

        Ok(())
    }

    /// Removes a stream outright. If it was active, its ActiveStream
    /// substructure and timer are torn down *without* calling the injector —
    /// the caller is presumed to be doing a harder teardown of its own. A
    /// target that drops to zero streams is removed from the registry.
    pub async fn remove_stream(&self, stream_id: &StreamId) -> Result<()> {
        let mut state = self.inner.state.write();
        let stream_arc = state
            .streams
            .get(stream_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(stream_id.to_string()))?;
        let target_id = stream_arc.read().target_id.clone();
        let target_arc = state
            .targets
            .get(&target_id)
            .cloned()
            .expect("a registered stream's target must exist");

        let target_now_empty = {
            let mut target = target_arc.write();
            let mut stream = stream_arc.write();
            if let Some(active) = stream.active.take() {
                if let Some(timer) = target.detach_active(&stream.stream_id, &active.auth_token) {
                    timer.abort();
                }
            }
            target.remove_inactive(stream_id);
            target.len() == 0
        };

        if target_now_empty {
            state.targets.remove(&target_id);
        }
        state.streams.remove(stream_id);

        Ok(())
    }

    /// Runs `f` against the stream's current state under its read lock.
    ///
    /// Routing is hand-over-hand: the stream's read lock is acquired while
    /// the manager and target read locks used to find it are still held, so
    /// a concurrent `remove_stream` cannot slip in between resolution and
    /// lock acquisition. Only once the stream lock is held are the target
    /// lock (first) and the manager lock (second) dropped; `f` then runs
    /// lock-free above the stream, so it may be arbitrarily slow.
    pub async fn read_stream<F, R>(&self, stream_id: &StreamId, f: F) -> Result<R>
    where
        F: FnOnce(&Stream) -> anyhow::Result<R>,
    {
        let state = self.inner.state.read();
        let stream_arc = state
            .streams
            .get(stream_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(stream_id.to_string()))?;
        let target_id = stream_arc.read().target_id.clone();
        let target_arc = state.targets.get(&target_id).cloned();

        let target_guard = target_arc.as_ref().map(|t| t.read());
        let guard = stream_arc.read();
        drop(target_guard);
        drop(state);

        f(&guard).map_err(Error::ClosureFailed)
    }

    /// Runs `f` against the stream under its write lock, with exclusive
    /// access. Routing is hand-over-hand exactly as in `read_stream`, just
    /// with the stream's write lock instead of its read lock.
    pub async fn modify_stream<F, R>(&self, stream_id: &StreamId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Stream) -> anyhow::Result<R>,
    {
        let state = self.inner.state.read();
        let stream_arc = state
            .streams
            .get(stream_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(stream_id.to_string()))?;
        let target_id = stream_arc.read().target_id.clone();
        let target_arc = state.targets.get(&target_id).cloned();

        let target_guard = target_arc.as_ref().map(|t| t.read());
        let mut guard = stream_arc.write();
        drop(target_guard);
        drop(state);

        f(&mut guard).map_err(Error::ClosureFailed)
    }

    /// Same as `modify_stream` but routes by auth token instead of stream id,
    /// with the same hand-over-hand discipline: the stream write lock is
    /// taken while the target's read lock (which resolved the token) is
    /// still held, then target and manager locks are dropped before `f` runs.
    /// Distinguishes malformed tokens, unknown targets, and unknown tokens
    /// within a known target so callers can audit-log them separately.
    pub async fn modify_active_stream<F, R>(&self, token: &AuthToken, f: F) -> Result<R>
    where
        F: FnOnce(&mut Stream) -> anyhow::Result<R>,
    {
        let prefix = token.target_prefix().map_err(Error::invalid_token)?;
        let target_id = TargetId::new(prefix);

        let state = self.inner.state.read();
        let target_arc = state
            .targets
            .get(&target_id)
            .cloned()
            .ok_or_else(|| Error::invalid_token(InvalidTokenKind::UnknownTarget))?;

        let target_guard = target_arc.read();
        let stream_id = target_guard
            .resolve_token(token)
            .ok_or_else(|| Error::invalid_token(InvalidTokenKind::UnknownToken))?;
        let stream_arc = state
            .streams
            .get(&stream_id)
            .cloned()
            .expect("a token-resolved stream must exist in the registry");

        let mut guard = stream_arc.write();
        drop(target_guard);
        drop(state);

        f(&mut guard).map_err(Error::ClosureFailed)
    }

    /// Checks out any one inactive stream of `target_id` to `user`/`engine`,
    /// mints a token, and arms its heartbeat timer. Multiple activations
    /// against different targets run fully in parallel: this only ever
    /// holds the manager read lock plus one target write lock plus one
    /// stream write lock.
    pub async fn activate_stream(
        &self,
        target_id: &TargetId,
        user: impl Into<String>,
        engine: impl Into<String>,
    ) -> Result<(AuthToken, StreamId)> {
        let state = self.inner.state.read();
        let target_arc = state
            .targets
            .get(target_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTarget(target_id.to_string()))?;

        let mut target = target_arc.write();
        let stream_id = target
            .pick_any_inactive()
            .ok_or_else(|| Error::TargetDrained(target_id.to_string()))?;
        let stream_arc = state
            .streams
            .get(&stream_id)
            .cloned()
            .expect("an inactive-set stream must exist in the registry");

        let token = AuthToken::generate(target_id);
        {
            let mut stream = stream_arc.write();
            stream.active = Some(ActiveStream::new(token.clone(), user.into(), engine.into()));
        }

        let timer = self.spawn_heartbeat(token.clone());
        target.activate(stream_id.clone(), token.clone(), timer);

        tracing::info!(target = %target_id, stream = %stream_id, "stream activated");
        Ok((token, stream_id))
    }

    /// Deactivates the stream bound to `token`, returning it to the
    /// inactive set and invoking the injector with no lock held. Called
    /// explicitly by the caller or by the stream's own heartbeat timer; a
    /// timer that fires after an explicit deactivation harmlessly observes
    /// `InvalidToken` here and discards it.
    pub async fn deactivate_stream(&self, token: &AuthToken) -> Result<()> {
        let (stream_arc, target_arc) = self.resolve_token(token)?;

        let snapshot = {
            let mut target = target_arc.write();
            let mut stream = stream_arc.write();
            let active = stream
                .active
                .take()
                .ok_or_else(|| Error::invalid_token(InvalidTokenKind::UnknownToken))?;
            if let Some(timer) = target.detach_active(&stream.stream_id, &active.auth_token) {
                timer.abort();
            }
            target.insert_inactive(stream.stream_id.clone());
            DeactivatedStream::from(&*stream)
        };

        tracing::info!(stream = %snapshot.stream_id, "stream deactivated");
        self.inner
            .injector
            .deactivate_stream_service(snapshot)
            .await
            .map_err(Error::InjectorFailed)
    }

    /// Cancels and re-arms the heartbeat timer for an active stream without
    /// touching any other field. Exposed for a core's explicit heartbeat
    /// call, as an alternative to letting the window lapse.
    ///
    /// The token is re-resolved to its stream *under the target's write
    /// lock*, in the same critical section that swaps in the new timer
    /// (`Target::rearm_timer_for_token`) — not via a separate read-locked
    /// resolve beforehand — so a `deactivate_stream` racing this call on the
    /// same token cannot unbind it in the gap between resolution and the
    /// timer swap. If the token no longer resolves (it lost that race), the
    /// freshly spawned timer is aborted instead of being left as a zombie
    /// entry in `timers`.
    pub async fn reset_active_stream(&self, token: &AuthToken) -> Result<()> {
        let target_arc = self.route_target_for_token(token)?;

        let timer = self.spawn_heartbeat(token.clone());
        match target_arc.write().rearm_timer_for_token(token, timer) {
            Ok(old) => {
                old.abort();
                Ok(())
            }
            Err(new_timer) => {
                new_timer.abort();
                Err(Error::invalid_token(InvalidTokenKind::UnknownToken))
            }
        }
    }

    /// Resolves a token's target prefix to its `Target`, without resolving
    /// the token itself to a stream. Callers that need the token-to-stream
    /// check to be atomic with a subsequent mutation (`reset_active_stream`)
    /// do that resolution themselves under the returned target's write lock
    /// rather than trusting a separate read-locked lookup here.
    fn route_target_for_token(&self, token: &AuthToken) -> Result<Arc<RwLock<Target>>> {
        let prefix = token.target_prefix().map_err(Error::invalid_token)?;
        let target_id = TargetId::new(prefix);

        let state = self.inner.state.read();
        state
            .targets
            .get(&target_id)
            .cloned()
            .ok_or_else(|| Error::invalid_token(InvalidTokenKind::UnknownTarget))
    }

    /// Token-routing for `deactivate_stream`, which needs to come back and
    /// take both the target's and stream's *write* locks, so both Arcs are
    /// returned rather than just the stream's.
    fn resolve_token(&self, token: &AuthToken) -> Result<(Arc<RwLock<Stream>>, Arc<RwLock<Target>>)> {
        let prefix = token.target_prefix().map_err(Error::invalid_token)?;
        let target_id = TargetId::new(prefix);

        let state = self.inner.state.read();
        let target_arc = state
            .targets
            .get(&target_id)
            .cloned()
            .ok_or_else(|| Error::invalid_token(InvalidTokenKind::UnknownTarget))?;
        let stream_id = target_arc
            .read()
            .resolve_token(token)
            .ok_or_else(|| Error::invalid_token(InvalidTokenKind::UnknownToken))?;
        let stream_arc = state
            .streams
            .get(&stream_id)
            .cloned()
            .expect("a token-resolved stream must exist in the registry");

        Ok((stream_arc, target_arc))
    }

    /// Spawns the one-shot heartbeat timer for a newly (re-)activated
    /// stream. Captures a weak handle to the manager's inner state so the
    /// timer task does not keep the manager alive past its own shutdown.
    fn spawn_heartbeat(&self, token: AuthToken) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let window = self.inner.expiration_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = Manager { inner };
            if let Err(err) = manager.deactivate_stream(&token).await {
                tracing::trace!(%token, %err, "heartbeat fired on an already-inactive token");
            }
        })
    }

    /// Point-in-time counts for one target, or `None` if it does not exist
    /// (either never created or already garbage-collected). Intended for
    /// health/diagnostics endpoints and tests; not used internally.
    pub fn target_stats(&self, target_id: &TargetId) -> Option<TargetStats> {
        self.inner
            .state
            .read()
            .targets
            .get(target_id)
            .map(|t| t.read().stats())
    }

    /// Total number of registered targets and streams, for health endpoints.
    pub fn registry_size(&self) -> (usize, usize) {
        let state = self.inner.state.read();
        (state.targets.len(), state.streams.len())
    }

    #[cfg(test)]
    pub(crate) fn target_token_count(&self, target_id: &TargetId) -> usize {
        self.target_stats(target_id).map(|s| s.token_count).unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn target_exists(&self, target_id: &TargetId) -> bool {
        self.inner.state.read().targets.contains_key(target_id)
    }

    #[cfg(test)]
    pub(crate) fn stream_count(&self) -> usize {
        self.inner.state.read().streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::LoggingInjector;

    fn test_manager() -> Manager {
        Manager::new(Arc::new(LoggingInjector), Duration::from_secs(20 * 60))
    }

    #[tokio::test]
    async fn s1_add_stream_registers_under_target() {
        let m = test_manager();
        let t = TargetId::new("tA");
        m.add_stream(Stream::new(StreamId::new("s1"), t.clone(), "alice"))
            .await
            .unwrap();
        assert_eq!(m.stream_count(), 1);
        assert!(m.target_exists(&t));
    }

    #[tokio::test]
    async fn s3_activate_then_remove_drains_target() {
        let m = test_manager();
        let t = TargetId::new("t");
        m.add_stream(Stream::new(StreamId::new("s"), t.clone(), "alice"))
            .await
            .unwrap();

        let (token, stream_id) = m.activate_stream(&t, "alice", "engA").await.unwrap();
        assert_eq!(stream_id, StreamId::new("s"));
        assert!(token.as_str().starts_with("t:"));
        assert_eq!(m.target_token_count(&t), 1);

        m.remove_stream(&stream_id).await.unwrap();
        assert!(!m.target_exists(&t));
        assert_eq!(m.stream_count(), 0);
    }

    #[tokio::test]
    async fn s4_fourth_activation_of_three_fails_drained() {
        let m = test_manager();
        let t = TargetId::new("x");
        for i in 0..3 {
            m.add_stream(Stream::new(StreamId::new(format!("s{i}")), t.clone(), "owner"))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            m.activate_stream(&t, "alice", "engA").await.unwrap();
        }
        let err = m.activate_stream(&t, "alice", "engA").await.unwrap_err();
        assert!(matches!(err, Error::TargetDrained(_)));
    }

    #[tokio::test]
    async fn activate_on_unknown_target_fails() {
        let m = test_manager();
        let err = m
            .activate_stream(&TargetId::new("ghost"), "alice", "engA")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn add_duplicate_stream_id_fails() {
        let m = test_manager();
        let t = TargetId::new("t");
        m.add_stream(Stream::new(StreamId::new("s"), t.clone(), "alice"))
            .await
            .unwrap();
        let err = m
            .add_stream(Stream::new(StreamId::new("s"), t, "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn remove_unknown_stream_is_not_found() {
        let m = test_manager();
        let err = m.remove_stream(&StreamId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn activate_then_deactivate_round_trips_to_inactive() {
        let m = test_manager();
        let t = TargetId::new("t");
        m.add_stream(Stream::new(StreamId::new("s"), t.clone(), "alice"))
            .await
            .unwrap();

        let (token, _) = m.activate_stream(&t, "alice", "engA").await.unwrap();
        assert_eq!(m.target_token_count(&t), 1);

        m.deactivate_stream(&token).await.unwrap();
        assert_eq!(m.target_token_count(&t), 0);

        // The stream is inactive again and can be reactivated.
        let (token2, _) = m.activate_stream(&t, "bob", "engB").await.unwrap();
        assert_ne!(token.as_str(), token2.as_str());
    }

    #[tokio::test]
    async fn deactivate_with_malformed_token_is_invalid() {
        let m = test_manager();
        let err = m
            .deactivate_stream(&AuthToken::from("no-colon-here".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidToken {
                kind: InvalidTokenKind::Malformed
            }
        ));
    }

    #[tokio::test]
    async fn deactivate_with_unknown_target_prefix_is_invalid() {
        let m = test_manager();
        let err = m
            .deactivate_stream(&AuthToken::from("ghost-target:abc".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidToken {
                kind: InvalidTokenKind::UnknownTarget
            }
        ));
    }

    #[tokio::test]
    async fn deactivate_twice_on_same_token_is_invalid_the_second_time() {
        let m = test_manager();
        let t = TargetId::new("t");
        m.add_stream(Stream::new(StreamId::new("s"), t.clone(), "alice"))
            .await
            .unwrap();
        let (token, _) = m.activate_stream(&t, "alice", "engA").await.unwrap();
        m.deactivate_stream(&token).await.unwrap();
        let err = m.deactivate_stream(&token).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidToken {
                kind: InvalidTokenKind::UnknownToken
            }
        ));
    }

    #[tokio::test]
    async fn modify_stream_mutates_under_exclusive_access() {
        let m = test_manager();
        let t = TargetId::new("t");
        m.add_stream(Stream::new(StreamId::new("s"), t, "alice"))
            .await
            .unwrap();

        m.modify_stream(&StreamId::new("s"), |s| {
            s.frames += 5;
            Ok(())
        })
        .await
        .unwrap();

        let frames = m
            .read_stream(&StreamId::new("s"), |s| Ok(s.frames))
            .await
            .unwrap();
        assert_eq!(frames, 5);
    }

    #[tokio::test]
    async fn reset_active_stream_keeps_token_bound() {
        let m = test_manager();
        let t = TargetId::new("t");
        m.add_stream(Stream::new(StreamId::new("s"), t.clone(), "alice"))
            .await
            .unwrap();
        let (token, _) = m.activate_stream(&t, "alice", "engA").await.unwrap();

        m.reset_active_stream(&token).await.unwrap();
        assert_eq!(m.target_token_count(&t), 1);

        // Still resolvable and deactivatable after the reset.
        m.deactivate_stream(&token).await.unwrap();
        assert_eq!(m.target_token_count(&t), 0);
    }

    #[tokio::test]
    async fn reset_active_stream_after_deactivate_does_not_resurrect_a_timer() {
        let m = test_manager();
        let t = TargetId::new("t");
        m.add_stream(Stream::new(StreamId::new("s"), t.clone(), "alice"))
            .await
            .unwrap();
        let (token, _) = m.activate_stream(&t, "alice", "engA").await.unwrap();

        // Simulates a heartbeat reset losing its race with an explicit
        // deactivation: by the time reset re-resolves the token, it is
        // already unbound. The target must come out with zero timers, not a
        // leaked one from the reset's freshly spawned task.
        m.deactivate_stream(&token).await.unwrap();
        let err = m.reset_active_stream(&token).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidToken {
                kind: InvalidTokenKind::UnknownToken
            }
        ));

        let stats = m.target_stats(&t).unwrap();
        assert_eq!(stats.timer_count, 0);
        assert_eq!(stats.token_count, 0);
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.inactive_count, 1);
    }

    /// Regression test for hand-over-hand routing: a `remove_stream` must
    /// not be able to delete a stream out from under an in-flight
    /// `modify_stream` on the same id. The modify's closure blocks until
    /// released, giving `remove_stream` every chance to race in; it must
    /// serialize behind the stream write lock instead of jumping ahead of it.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn remove_stream_serializes_behind_an_in_flight_modify() {
        let m = test_manager();
        let t = TargetId::new("t");
        let id = StreamId::new("s");
        m.add_stream(Stream::new(id.clone(), t, "alice")).await.unwrap();

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();

        let modify = {
            let m = m.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut release_rx = Some(release_rx);
                m.modify_stream(&id, move |s| {
                    let _ = entered_tx.send(());
                    // Block the stream write lock until told to continue,
                    // standing in for an arbitrarily slow closure.
                    let _ = release_rx.take().unwrap().blocking_recv();
                    s.frames += 1;
                    Ok(())
                })
                .await
            })
        };

        entered_rx.await.unwrap();
        let remove = {
            let m = m.clone();
            let id = id.clone();
            tokio::spawn(async move { m.remove_stream(&id).await })
        };

        // Give `remove_stream` every opportunity to race ahead before the
        // modify closure is released; it must still be blocked on the
        // stream's write lock at this point.
        tokio::time::sleep(Duration::from_millis(50)).await;
        release_tx.send(()).unwrap();

        modify.await.unwrap().unwrap();
        remove.await.unwrap().unwrap();
        assert_eq!(m.stream_count(), 0);
    }
}
