//! Guarded state machine for lifecycle coordination.
//!
//! Holds one current state and a version that increases on every
//! transition. Transitions are validated against [`State::can_transition_to`]
//! and wake every waiter; waiters re-check their predicate after each wakeup
//! because several transitions may happen before they get to run.
//!
//! The exclusive guard is not reentrant: a thread that already holds it
//! (for example from inside a transition hook) gets
//! [`RepoError::AlreadyLocked`] instead of a deadlock.

use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use artivault_core::{RepoError, RepoResult};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, trace, warn};

/// A lifecycle state with a transition relation.
pub trait State: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Returns true if moving from `self` to `next` is allowed.
    fn can_transition_to(&self, next: &Self) -> bool;
}

struct Inner<S> {
    state: S,
    version: u64,
    interrupts: u64,
}

/// A state holder with validated transitions and timed waiting.
pub struct GuardedStateMachine<S: State> {
    name: String,
    inner: Mutex<Inner<S>>,
    changed: Condvar,
    /// Mirror of the current state for non-blocking reads.
    current: RwLock<S>,
    owner: Mutex<Option<ThreadId>>,
    default_timeout: Duration,
}

/// Holds the exclusive lock and records the owning thread until dropped.
struct ExclusiveGuard<'a, S: State> {
    machine: &'a GuardedStateMachine<S>,
    guard: MutexGuard<'a, Inner<S>>,
}

impl<S: State> Drop for ExclusiveGuard<'_, S> {
    fn drop(&mut self) {
        *self.machine.owner.lock() = None;
    }
}

impl<S: State> GuardedStateMachine<S> {
    /// Creates a machine in `initial` state.
    ///
    /// `default_timeout` bounds the wait performed by
    /// [`transition_to`](Self::transition_to) when `wait_for_next` is set.
    pub fn new(name: impl Into<String>, initial: S, default_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: initial.clone(),
                version: 0,
                interrupts: 0,
            }),
            changed: Condvar::new(),
            current: RwLock::new(initial),
            owner: Mutex::new(None),
            default_timeout,
        }
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking read of the current state.
    pub fn current_state(&self) -> S {
        self.current.read().clone()
    }

    /// Number of transitions performed so far.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Moves to `new_state`.
    ///
    /// A transition to the current state is a no-op. If `wait_for_next` is
    /// set, blocks after the transition until another one happens.
    pub fn transition_to(&self, new_state: S, wait_for_next: bool) -> RepoResult<S> {
        self.transition_with(new_state, wait_for_next, |_, _| Ok(()))
    }

    /// Moves to `new_state`, running `on_transition(from, to)` first.
    ///
    /// The hook runs under the exclusive lock; if it fails the state is left
    /// unchanged and its error is returned.
    pub fn transition_with<F>(&self, new_state: S, wait_for_next: bool, on_transition: F) -> RepoResult<S>
    where
        F: FnOnce(&S, &S) -> RepoResult<()>,
    {
        let mut exclusive = self.lock_exclusive()?;
        if exclusive.guard.state == new_state {
            trace!(machine = %self.name, state = ?new_state, "transition to current state ignored");
            return Ok(new_state);
        }

        let from = exclusive.guard.state.clone();
        on_transition(&from, &new_state)?;

        if !from.can_transition_to(&new_state) {
            warn!(machine = %self.name, from = ?from, to = ?new_state, "invalid transition");
            return Err(RepoError::InvalidTransition {
                from: format!("{:?}", from),
                to: format!("{:?}", new_state),
            });
        }

        exclusive.guard.state = new_state.clone();
        exclusive.guard.version += 1;
        *self.current.write() = new_state.clone();
        let version = exclusive.guard.version;
        self.changed.notify_all();
        debug!(machine = %self.name, from = ?from, to = ?new_state, version, "state transition");

        if !wait_for_next {
            return Ok(new_state);
        }
        let interrupts = exclusive.guard.interrupts;
        let deadline = Instant::now() + self.default_timeout;
        let timeout = self.default_timeout;
        self.wait_on(&mut exclusive.guard, interrupts, deadline, timeout, |inner| {
            inner.version > version
        })
    }

    /// Blocks until a transition happens after this call, or `timeout` elapses.
    pub fn wait_for_next_transition(&self, timeout: Duration) -> RepoResult<S> {
        self.check_not_owner()?;
        let mut guard = self.inner.lock();
        let observed = guard.version;
        let interrupts = guard.interrupts;
        let deadline = Instant::now() + timeout;
        self.wait_on(&mut guard, interrupts, deadline, timeout, |inner| inner.version > observed)
    }

    /// Blocks until `predicate` holds for the current state.
    ///
    /// The predicate is re-evaluated after every wakeup; intermediate states
    /// that do not satisfy it are skipped.
    pub fn wait_until<P>(&self, mut predicate: P, timeout: Duration) -> RepoResult<S>
    where
        P: FnMut(&S) -> bool,
    {
        self.check_not_owner()?;
        let mut guard = self.inner.lock();
        let interrupts = guard.interrupts;
        let deadline = Instant::now() + timeout;
        self.wait_on(&mut guard, interrupts, deadline, timeout, |inner| predicate(&inner.state))
    }

    /// Fails every wait currently in progress with [`RepoError::Interrupted`].
    pub fn interrupt(&self) {
        let mut guard = self.inner.lock();
        guard.interrupts += 1;
        self.changed.notify_all();
        debug!(machine = %self.name, "waiters interrupted");
    }

    fn wait_on<C>(
        &self,
        guard: &mut MutexGuard<'_, Inner<S>>,
        interrupts: u64,
        deadline: Instant,
        timeout: Duration,
        mut done: C,
    ) -> RepoResult<S>
    where
        C: FnMut(&Inner<S>) -> bool,
    {
        loop {
            if done(&**guard) {
                return Ok(guard.state.clone());
            }
            if guard.interrupts != interrupts {
                return Err(RepoError::Interrupted {
                    what: self.name.clone(),
                });
            }
            if self.changed.wait_until(guard, deadline).timed_out() {
                if done(&**guard) {
                    return Ok(guard.state.clone());
                }
                return Err(RepoError::timeout(
                    format!("next transition of {}", self.name),
                    timeout,
                ));
            }
        }
    }

    fn check_not_owner(&self) -> RepoResult<()> {
        if *self.owner.lock() == Some(thread::current().id()) {
            return Err(RepoError::AlreadyLocked {
                what: self.name.clone(),
            });
        }
        Ok(())
    }

    fn lock_exclusive(&self) -> RepoResult<ExclusiveGuard<'_, S>> {
        self.check_not_owner()?;
        let guard = self.inner.lock();
        *self.owner.lock() = Some(thread::current().id());
        Ok(ExclusiveGuard { machine: self, guard })
    }
}

impl<S: State> fmt::Debug for GuardedStateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedStateMachine")
            .field("name", &self.name)
            .field("state", &self.current_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq)]
    enum Phase {
        A,
        B,
        C,
    }

    impl State for Phase {
        fn can_transition_to(&self, next: &Self) -> bool {
            matches!((self, next), (Phase::A, Phase::B) | (Phase::B, Phase::C) | (Phase::C, Phase::A))
        }
    }

    fn machine() -> GuardedStateMachine<Phase> {
        GuardedStateMachine::new("test", Phase::A, Duration::from_millis(200))
    }

    #[test]
    fn test_valid_transitions() {
        let m = machine();
        assert_eq!(m.transition_to(Phase::B, false).unwrap(), Phase::B);
        assert_eq!(m.transition_to(Phase::C, false).unwrap(), Phase::C);
        assert_eq!(m.current_state(), Phase::C);
        assert_eq!(m.version(), 2);
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let m = machine();
        match m.transition_to(Phase::C, false) {
            Err(RepoError::InvalidTransition { from, to }) => {
                assert_eq!(from, "A");
                assert_eq!(to, "C");
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(m.current_state(), Phase::A);
        assert_eq!(m.version(), 0);
    }

    #[test]
    fn test_same_state_is_noop() {
        let m = machine();
        m.transition_to(Phase::A, false).unwrap();
        assert_eq!(m.version(), 0);
    }

    #[test]
    fn test_hook_failure_aborts_transition() {
        let m = machine();
        let err = m
            .transition_with(Phase::B, false, |_, _| Err(RepoError::Storage("disk full".to_string())))
            .unwrap_err();
        assert!(matches!(err, RepoError::Storage(_)));
        assert_eq!(m.current_state(), Phase::A);
    }

    #[test]
    fn test_hook_sees_both_states() {
        let m = machine();
        let mut seen = None;
        m.transition_with(Phase::B, false, |from, to| {
            seen = Some((from.clone(), to.clone()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, Some((Phase::A, Phase::B)));
    }

    #[test]
    fn test_reentrant_transition_is_already_locked() {
        let m = machine();
        let err = m
            .transition_with(Phase::B, false, |_, _| {
                m.transition_to(Phase::C, false).map(|_| ())
            })
            .unwrap_err();
        assert!(matches!(err, RepoError::AlreadyLocked { .. }));
        assert!(err.is_programming_error());
        assert_eq!(m.current_state(), Phase::A);
    }

    #[test]
    fn test_current_state_readable_inside_hook() {
        let m = machine();
        m.transition_with(Phase::B, false, |_, _| {
            assert_eq!(m.current_state(), Phase::A);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let m = machine();
        let err = m.wait_for_next_transition(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, RepoError::LockTimeout { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_wait_for_next_transition_wakes() {
        let m = Arc::new(machine());
        let waiter = {
            let m = m.clone();
            thread::spawn(move || m.wait_for_next_transition(Duration::from_secs(5)))
        };
        let cycle = [Phase::B, Phase::C, Phase::A];
        let mut next = 0;
        while !waiter.is_finished() {
            thread::sleep(Duration::from_millis(5));
            m.transition_to(cycle[next % 3].clone(), false).unwrap();
            next += 1;
        }
        let woken_in = waiter.join().unwrap().unwrap();
        assert!(m.version() >= 1);
        assert!(cycle.contains(&woken_in));
    }

    #[test]
    fn test_wait_until_skips_intermediate_states() {
        let m = Arc::new(machine());
        let waiter = {
            let m = m.clone();
            thread::spawn(move || m.wait_until(|s| *s == Phase::C, Duration::from_secs(5)))
        };
        m.transition_to(Phase::B, false).unwrap();
        m.transition_to(Phase::C, false).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), Phase::C);
    }

    #[test]
    fn test_wait_until_already_satisfied() {
        let m = machine();
        assert_eq!(m.wait_until(|s| *s == Phase::A, Duration::ZERO).unwrap(), Phase::A);
    }

    #[test]
    fn test_interrupt_fails_waiter() {
        let m = Arc::new(machine());
        let waiter = {
            let m = m.clone();
            thread::spawn(move || m.wait_until(|s| *s == Phase::C, Duration::from_secs(5)))
        };
        let result = loop {
            m.interrupt();
            if waiter.is_finished() {
                break waiter.join().unwrap();
            }
            thread::sleep(Duration::from_millis(5));
        };
        assert!(matches!(result, Err(RepoError::Interrupted { .. })));
    }

    #[test]
    fn test_transition_and_wait_for_next() {
        let m = Arc::new(machine());
        let mover = {
            let m = m.clone();
            thread::spawn(move || m.transition_to(Phase::B, true))
        };
        while m.current_state() != Phase::B {
            thread::sleep(Duration::from_millis(2));
        }
        m.transition_to(Phase::C, false).unwrap();
        assert_eq!(mover.join().unwrap().unwrap(), Phase::C);
    }

    #[test]
    fn test_transition_and_wait_for_next_times_out() {
        let m = machine();
        let err = m.transition_to(Phase::B, true).unwrap_err();
        assert!(matches!(err, RepoError::LockTimeout { .. }));
        assert_eq!(m.current_state(), Phase::B);
    }
}
