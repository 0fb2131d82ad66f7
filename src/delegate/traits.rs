use async_trait::async_trait;

use super::types::OperationContext;
use crate::error::RequestError;
use crate::http::HttpRequest;
use crate::requestable::Requestable;
use crate::response::ResponseEnvelope;

/// Observer/mutator attached to a [`Requestable`], invoked in registration
/// order at defined pipeline points.
///
/// Hooks compose: `prepare` and `did_transform` each receive the previous
/// delegate's output, so an auth delegate and a logging delegate layer
/// cleanly. Unimplemented hooks are no-ops.
#[async_trait]
pub trait RequestDelegate<R: Requestable>: Send + Sync {
    /// Mutates the outgoing request before send. Runs after the requestable's
    /// own `prepare`.
    async fn prepare(
        &self,
        request: HttpRequest,
        _requestable: &R,
        _operation: &OperationContext,
    ) -> HttpRequest {
        request
    }

    /// Observes the request just after the transport accepted it.
    async fn will_send(
        &self,
        _request: &HttpRequest,
        _requestable: &R,
        _operation: &OperationContext,
    ) {
    }

    /// Transforms the completed response. Runs before the requestable's own
    /// `did_transform`, which has final say.
    async fn did_transform(
        &self,
        response: ResponseEnvelope<R::Response>,
        _requestable: &R,
        _operation: &OperationContext,
    ) -> ResponseEnvelope<R::Response> {
        response
    }

    /// Observes the final value on success.
    async fn did_succeed(
        &self,
        _value: &R::Response,
        _requestable: &R,
        _operation: &OperationContext,
    ) {
    }

    /// Observes the final error on failure.
    async fn did_fail(
        &self,
        _error: &RequestError,
        _requestable: &R,
        _operation: &OperationContext,
    ) {
    }
}
