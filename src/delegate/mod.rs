//! Delegate hooks for cross-cutting request concerns.
//!
//! A delegate observes and mutates one operation's pipeline at defined points:
//! header injection before send, observation after send, response
//! transformation, and terminal success/failure. Implement only the hooks you
//! need; everything defaults to a no-op.
//!
//! ## Key Components
//!
//! - [`RequestDelegate`] - the hook set, all hooks optional
//! - [`OperationContext`] - identifies the invoking operation inside a hook

mod traits;
mod types;

pub use traits::RequestDelegate;
pub use types::{OperationContext, OperationKind};
