//! The typed result envelope and the serialization adapter that produces it.
//!
//! Every started operation terminates in exactly one [`ResponseEnvelope`]:
//! either a typed value or a [`RequestError`], always alongside whatever raw
//! transport material produced it. The adapter isolates serializer failures so
//! a misbehaving serializer degrades to a typed failure instead of taking the
//! pipeline down.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use crate::error::{RequestError, TransportError};
use crate::http::{HttpRequest, ResponseHead};
use crate::requestable::Requestable;
use crate::transport::RawExchange;

/// Timing captured across one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetrics {
    /// Wall-clock instant the transport call was issued.
    pub started_at: DateTime<Utc>,
    /// Transport duration, request sent to outcome received.
    pub elapsed: Duration,
    /// Time spent in the serializer.
    pub serialization: Duration,
}

impl RequestMetrics {
    /// Metrics for an operation that never reached the transport.
    pub(crate) fn empty() -> Self {
        Self {
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            serialization: Duration::ZERO,
        }
    }
}

/// Final result of one operation: a typed value or error plus the raw
/// transport material behind it.
///
/// Raw fields are populated when the transport produced them and `None`
/// otherwise — an operation cancelled before start carries none of them.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope<T> {
    pub request: Option<HttpRequest>,
    pub response: Option<ResponseHead>,
    pub data: Option<Bytes>,
    pub metrics: RequestMetrics,
    pub result: Result<T, RequestError>,
}

impl<T> ResponseEnvelope<T> {
    /// Envelope for an operation cancelled before its transport call existed.
    pub(crate) fn cancelled() -> Self {
        Self {
            request: None,
            response: None,
            data: None,
            metrics: RequestMetrics::empty(),
            result: Err(RequestError::Cancelled),
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RequestError> {
        self.result.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// HTTP status of the raw response, when one was received.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|head| head.status)
    }

    /// Replaces the result, keeping all raw fields. The primitive
    /// `did_transform` hooks build on.
    pub fn with_result(mut self, result: Result<T, RequestError>) -> Self {
        self.result = result;
        self
    }
}

/// Runs the requestable's serializer over a raw exchange, producing the final
/// envelope.
///
/// Serializers are expected to be total. A panicking serializer is a contract
/// violation: it is logged and converted into a `Serialization` failure so the
/// completion contract holds regardless. An aborted exchange short-circuits to
/// `Cancelled` without consulting the serializer.
pub(crate) fn serialize_exchange<R: Requestable>(
    requestable: &R,
    raw: RawExchange,
) -> ResponseEnvelope<R::Response> {
    let clock = Instant::now();

    let result = if matches!(raw.error, Some(TransportError::Aborted)) {
        Err(RequestError::Cancelled)
    } else {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            requestable.serialize(
                raw.request.as_ref(),
                raw.response.as_ref(),
                raw.data.as_ref(),
                raw.error.as_ref(),
            )
        }));

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(&panic);
                tracing::error!(reason, "serializer panicked; converting to typed failure");
                Err(RequestError::Serialization(format!(
                    "serializer panicked: {}",
                    reason
                )))
            }
        }
    };

    ResponseEnvelope {
        request: raw.request,
        response: raw.response,
        data: raw.data,
        metrics: RequestMetrics {
            started_at: raw.started_at,
            elapsed: raw.elapsed,
            serialization: clock.elapsed(),
        },
        result,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Stock serializer body for JSON response types.
///
/// Transport errors fail the exchange first (an abort becomes `Cancelled`),
/// a non-2xx status is rejected as application-level policy, and the body is
/// then decoded with `serde_json`.
pub fn serialize_json<T: DeserializeOwned>(
    _request: Option<&HttpRequest>,
    response: Option<&ResponseHead>,
    data: Option<&Bytes>,
    error: Option<&TransportError>,
) -> Result<T, RequestError> {
    if let Some(error) = error {
        return Err(RequestError::from_transport(error));
    }

    let head = response
        .ok_or_else(|| RequestError::Serialization("response metadata missing".to_string()))?;
    if !head.is_success() {
        return Err(RequestError::Validation(format!(
            "unacceptable status code {}",
            head.status
        )));
    }

    let data =
        data.ok_or_else(|| RequestError::Serialization("response body missing".to_string()))?;
    serde_json::from_slice(data).map_err(|e| RequestError::Serialization(e.to_string()))
}
