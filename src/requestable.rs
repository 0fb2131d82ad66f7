//! The caller-supplied description of one kind of request.
//!
//! A [`Requestable`] is read-only to the core for an operation's lifetime: it
//! names the target, owns the serializer and delegate list, optionally carries
//! a body description or download destination, and gets first/last say in the
//! hook chain. Construct operations from it via
//! [`RequestOperation`](crate::operation::RequestOperation).

use async_trait::async_trait;
use bon::Builder;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;

use crate::delegate::{OperationContext, RequestDelegate};
use crate::error::{RequestError, TransportError};
use crate::http::{HttpRequest, Method, ResponseHead};
use crate::response::ResponseEnvelope;
use crate::transport::UploadSource;

/// Where a request goes: URL, method, fixed headers and query parameters.
///
/// Query values are appended as given; pre-encode anything that needs it.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct RequestTarget {
    #[builder(into)]
    pub url: String,
    #[builder(default = Method::Get)]
    pub method: Method,
    #[builder(default)]
    pub headers: Vec<(String, String)>,
    #[builder(default)]
    pub query: Vec<(String, String)>,
}

impl RequestTarget {
    /// Materializes the outgoing request the prepare chain will mutate.
    pub fn to_request(&self) -> HttpRequest {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            let pairs: Vec<String> = self
                .query
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            url.push_str(&pairs.join("&"));
        }

        HttpRequest {
            method: self.method,
            url,
            headers: self.headers.clone(),
        }
    }
}

/// Configuration for one kind of request, immutable per operation instance.
///
/// Only `target` and `serialize` are required. Hooks mirror the delegate set;
/// the requestable's `prepare` runs first in its chain and its `did_transform`
/// runs last, giving the concrete request type final say.
#[async_trait]
pub trait Requestable: Send + Sync + Sized + 'static {
    /// The declared response shape.
    type Response: Send + Sync + 'static;

    fn target(&self) -> RequestTarget;

    /// Converts raw transport output into a typed result.
    ///
    /// Must be total: application-level failures (non-2xx status, unexpected
    /// payload shape) are reported by returning an error, never by panicking.
    /// See [`serialize_json`](crate::response::serialize_json) for the stock
    /// JSON body.
    fn serialize(
        &self,
        request: Option<&HttpRequest>,
        response: Option<&ResponseHead>,
        data: Option<&Bytes>,
        error: Option<&TransportError>,
    ) -> Result<Self::Response, RequestError>;

    /// Delegates invoked in registration order at every pipeline point.
    fn delegates(&self) -> Vec<Arc<dyn RequestDelegate<Self>>> {
        Vec::new()
    }

    /// Body description for upload operations.
    fn upload_source(&self) -> Option<UploadSource> {
        None
    }

    /// Destination file for download operations.
    fn destination(&self) -> Option<PathBuf> {
        None
    }

    async fn prepare(
        &self,
        request: HttpRequest,
        _operation: &OperationContext,
    ) -> HttpRequest {
        request
    }

    async fn will_send(&self, _request: &HttpRequest, _operation: &OperationContext) {}

    async fn did_transform(
        &self,
        response: ResponseEnvelope<Self::Response>,
        _operation: &OperationContext,
    ) -> ResponseEnvelope<Self::Response> {
        response
    }

    async fn did_succeed(&self, _value: &Self::Response, _operation: &OperationContext) {}

    async fn did_fail(&self, _error: &RequestError, _operation: &OperationContext) {}
}
