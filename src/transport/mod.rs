//! Transport boundary.
//!
//! The core never performs network I/O itself. A [`Transport`] turns a
//! prepared [`HttpRequest`](crate::http::HttpRequest) plus a [`Transfer`]
//! shape into a live [`TransportHandle`] which yields exactly one
//! [`RawExchange`] and, for upload/download transfers, a stream of progress
//! fractions.
//!
//! ## Key Components
//!
//! - [`Transport`] - the seam implemented by real clients and test doubles
//! - [`TransportHandle`] / [`TransportController`] - the two ends of one exchange
//! - [`Aborter`] - best-effort cancellation signal
//! - [`RawExchange`] - untyped outcome: bytes, head, error, timing
//! - [`ReqwestTransport`] - the stock implementation over reqwest

mod handle;
mod reqwest;
mod traits;
mod types;

pub use handle::{Aborter, TransportController, TransportHandle};
pub use reqwest::{ReqwestTransport, TransportConfig};
pub use traits::Transport;
pub use types::{RawExchange, Transfer, UploadSource};
