use super::handle::TransportHandle;
use super::types::Transfer;
use crate::http::HttpRequest;

/// The seam between the operation core and actual network I/O.
///
/// `send` must return immediately with a live handle; the exchange runs in the
/// background and reports through the handle exactly once. The handle is owned
/// exclusively by the issuing operation until it finishes.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: HttpRequest, transfer: Transfer) -> TransportHandle;
}
