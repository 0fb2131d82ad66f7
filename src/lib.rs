//! Cancellable, observable units of HTTP work.
//!
//! A [`Requestable`](requestable::Requestable) describes one kind of request:
//! its target, its serializer, its delegates and optionally a body or
//! download destination. A
//! [`RequestOperation`](operation::RequestOperation) wraps one execution of
//! it — thread-safe start/cancel, ordered delegate hooks, typed
//! deserialization with graceful fallback, and exactly one final
//! [`ResponseEnvelope`](response::ResponseEnvelope) delivered on a
//! caller-chosen context.

pub mod delegate;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod multipart;
pub mod operation;
pub mod requestable;
pub mod response;
pub mod transport;
