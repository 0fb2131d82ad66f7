//! Delivery contexts for completion handlers and progress callbacks.
//!
//! Callers choose where their callbacks run. The core guarantees delivery
//! happens on exactly the chosen context and, unless [`InlineDispatcher`] is
//! requested, never synchronously on the task driving the transport.

use std::sync::Arc;

/// A job handed to a dispatcher.
pub type DispatchJob = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that accepts fire-and-forget jobs.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, job: DispatchJob);
}

pub type SharedDispatcher = Arc<dyn Dispatcher>;

/// Runs each job on a fresh tokio task. The default context.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnDispatcher;

impl Dispatcher for SpawnDispatcher {
    fn dispatch(&self, job: DispatchJob) {
        tokio::spawn(async move {
            job();
        });
    }
}

/// Runs each job synchronously on the dispatching task.
///
/// Only for callers that explicitly want their handler on the operation's own
/// driver task; a blocking handler will stall that operation's pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: DispatchJob) {
        job();
    }
}
