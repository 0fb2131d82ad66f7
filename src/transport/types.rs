use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransportError;
use crate::http::{HttpRequest, ResponseHead};
use crate::multipart::MultipartForm;

/// What one operation asks its transport to move, beyond the request itself.
///
/// This is the only thing distinguishing the plain, upload and download
/// flavors of an operation; the state machine is shared.
#[derive(Debug, Clone)]
pub enum Transfer {
    /// Plain request/response exchange, body delivered in memory.
    Data,
    /// Request carrying an upload body; progress reported while streaming it.
    Upload(UploadSource),
    /// Response streamed to a destination file; progress reported while reading.
    Download(PathBuf),
}

impl Transfer {
    /// Upload and download transfers carry a progress stream.
    pub fn reports_progress(&self) -> bool {
        !matches!(self, Transfer::Data)
    }
}

/// Body description for upload transfers.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Multipart(MultipartForm),
    File(PathBuf),
}

/// The untyped outcome of one exchange, reported by the transport exactly once.
///
/// `request` echoes the request actually sent (after prepare hooks ran).
/// `response`, `data` and `error` are populated when the transport produced
/// them and absent otherwise; a failed connection has no head, a download has
/// no in-memory data.
#[derive(Debug, Clone)]
pub struct RawExchange {
    pub request: Option<HttpRequest>,
    pub response: Option<ResponseHead>,
    pub data: Option<Bytes>,
    pub error: Option<TransportError>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RawExchange {
    /// Outcome for an exchange whose transport went away without reporting.
    pub(crate) fn abandoned(request: Option<HttpRequest>) -> Self {
        Self {
            request,
            response: None,
            data: None,
            error: Some(TransportError::Dropped),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }
}
