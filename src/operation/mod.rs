//! The operation state machine.
//!
//! A [`RequestOperation`] is a single-use, cancellable unit of work wrapping
//! one transport exchange. Its lifecycle is `Idle -> Executing -> Finished`
//! with an orthogonal cancelled flag; `start`/`cancel` are safe under
//! concurrent use and every started operation delivers exactly one
//! [`ResponseEnvelope`](crate::response::ResponseEnvelope) to its completion
//! handler.
//!
//! ## Key Components
//!
//! - [`RequestOperation`] - plain/upload/download constructors, `start`,
//!   `cancel`, `copy`
//! - [`OperationState`] - lifecycle state, queryable at any time
//! - [`ProgressHandler`] - progress callback plus its delivery context

mod request;
mod state;

pub use request::{
    CompletionHandler, OperationError, ProgressFn, ProgressHandler, RequestOperation,
};
pub use state::OperationState;
