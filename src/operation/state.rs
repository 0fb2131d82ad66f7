use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::transport::Aborter;

/// Lifecycle state of one operation. The cancelled flag is orthogonal and
/// lives alongside in [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Executing,
    Finished,
}

/// Outcome of an attempted `start()`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StartDecision {
    /// Won the Idle -> Executing transition; caller drives the transport.
    Run,
    /// Was cancelled while Idle; state moved straight to Finished and the
    /// caller delivers a cancellation envelope without touching the transport.
    CancelledBeforeStart,
    /// Not Idle; nothing to do.
    Ignored,
}

/// The only shared-mutable state of an operation, guarded for concurrent
/// `start`/`cancel` from any thread.
///
/// The transport aborter is attached once the transport call exists and is
/// dropped when the operation finishes.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<OperationState>,
    cancelled: AtomicBool,
    aborter: Mutex<Option<Aborter>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OperationState::Idle),
            cancelled: AtomicBool::new(false),
            aborter: Mutex::new(None),
        }
    }

    pub fn state(&self) -> OperationState {
        *lock(&self.state)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Decides what a `start()` call does. At most one caller ever observes a
    /// non-`Ignored` decision.
    pub fn try_begin(&self) -> StartDecision {
        let mut state = lock(&self.state);
        match *state {
            OperationState::Idle if self.is_cancelled() => {
                *state = OperationState::Finished;
                StartDecision::CancelledBeforeStart
            }
            OperationState::Idle => {
                *state = OperationState::Executing;
                StartDecision::Run
            }
            _ => StartDecision::Ignored,
        }
    }

    /// Marks the operation cancelled and forwards a best-effort abort to the
    /// transport when one is in flight. Idempotent, callable from any state.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if *lock(&self.state) == OperationState::Executing {
            if let Some(aborter) = lock(&self.aborter).as_ref() {
                aborter.abort();
            }
        }
    }

    /// Hands the transport's abort signal to the lifecycle. A cancel that
    /// raced ahead of the attach is honored immediately.
    pub fn attach_aborter(&self, aborter: Aborter) {
        *lock(&self.aborter) = Some(aborter);
        if self.is_cancelled() {
            if let Some(aborter) = lock(&self.aborter).as_ref() {
                aborter.abort();
            }
        }
    }

    /// Terminal transition. The last mutation an operation ever performs.
    pub fn finish(&self) {
        *lock(&self.state) = OperationState::Finished;
        lock(&self.aborter).take();
    }
}
