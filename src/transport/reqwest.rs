//! Stock transport over reqwest.

use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Proxy};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::handle::{TransportController, TransportHandle};
use super::traits::Transport;
use super::types::{RawExchange, Transfer, UploadSource};
use crate::error::TransportError;
use crate::http::{HttpRequest, Method, ResponseHead};

/// Upload bodies are streamed in slices this large so progress has something
/// to report.
const UPLOAD_CHUNK: usize = 64 * 1024;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: concat!("requestbox/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 10,
        }
    }
}

/// The default [`Transport`]: one reqwest client shared across operations.
///
/// Unlike a status-checking downloader, this transport treats any received
/// response as a successful exchange; application-level policy (acceptable
/// status codes, payload shape) belongs to the serializer and delegates.
/// It performs exactly one attempt per exchange; retry policy is the
/// caller's concern.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport, optionally routed through a proxy.
    pub fn new(config: TransportConfig, proxy_url: Option<&str>) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if let Some(url) = proxy_url {
            let proxy = Proxy::all(url)
                .map_err(|e| TransportError::InvalidUrl(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client })
    }

    /// Transport with default configuration and no proxy.
    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(TransportConfig::default(), None)
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest, transfer: Transfer) -> TransportHandle {
        let (handle, controller) = TransportHandle::new_pair(transfer.reports_progress());
        let client = self.client.clone();

        tokio::spawn(async move {
            let started_at = Utc::now();
            let clock = Instant::now();
            debug!(method = %request.method, url = %request.url, "exchange started");

            let result = tokio::select! {
                _ = controller.aborter.aborted() => Err(TransportError::Aborted),
                outcome = perform(&client, &request, &transfer, &controller) => outcome,
            };
            let elapsed = clock.elapsed();

            let raw = match result {
                Ok((head, data)) => {
                    debug!(status = head.status, elapsed_ms = elapsed.as_millis() as u64, "exchange completed");
                    RawExchange {
                        request: Some(request),
                        response: Some(head),
                        data,
                        error: None,
                        started_at,
                        elapsed,
                    }
                }
                Err(error) => {
                    warn!(url = %request.url, error = %error, "exchange failed");
                    RawExchange {
                        request: Some(request),
                        response: None,
                        data: None,
                        error: Some(error),
                        started_at,
                        elapsed,
                    }
                }
            };

            let _ = controller.outcome.send(raw);
        });

        handle
    }
}

async fn perform(
    client: &Client,
    request: &HttpRequest,
    transfer: &Transfer,
    controller: &TransportController,
) -> Result<(ResponseHead, Option<Bytes>), TransportError> {
    let mut builder = client.request(convert_method(request.method), &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    match transfer {
        Transfer::Data => {
            let response = builder.send().await.map_err(classify)?;
            let head = capture_head(&response);
            let data = response.bytes().await.map_err(|e| TransportError::Body(e.to_string()))?;
            Ok((head, Some(data)))
        }
        Transfer::Upload(source) => {
            let (body, content_type) = match source {
                UploadSource::Multipart(form) => (form.encode(), Some(form.content_type())),
                UploadSource::File(path) => {
                    let data = tokio::fs::read(path)
                        .await
                        .map_err(|e| TransportError::Io(e.to_string()))?;
                    (Bytes::from(data), None)
                }
            };
            if let Some(content_type) = content_type {
                if request.header("Content-Type").is_none() {
                    builder = builder.header("Content-Type", content_type);
                }
            }

            builder = builder.body(progress_body(body, controller));
            let response = builder.send().await.map_err(classify)?;
            // The whole body went out before a response could arrive.
            controller.report_progress(1.0);

            let head = capture_head(&response);
            let data = response.bytes().await.map_err(|e| TransportError::Body(e.to_string()))?;
            Ok((head, Some(data)))
        }
        Transfer::Download(destination) => {
            let mut response = builder.send().await.map_err(classify)?;
            let head = capture_head(&response);
            let total = response.content_length();

            let mut file = tokio::fs::File::create(destination)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            let mut written: u64 = 0;

            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| TransportError::Body(e.to_string()))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                written += chunk.len() as u64;
                if let Some(total) = total.filter(|t| *t > 0) {
                    controller.report_progress(written as f64 / total as f64);
                }
            }

            file.flush()
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            controller.report_progress(1.0);

            Ok((head, None))
        }
    }
}

/// Wraps an upload body in a chunked stream that reports cumulative fractions
/// as reqwest consumes it.
fn progress_body(data: Bytes, controller: &TransportController) -> reqwest::Body {
    if data.is_empty() {
        return reqwest::Body::from(data);
    }

    let progress = controller.progress.clone();
    let stream = futures_util::stream::iter(chunk_with_fractions(&data).into_iter().map(
        move |(chunk, fraction)| {
            if let Some(tx) = &progress {
                let _ = tx.try_send(fraction);
            }
            Ok::<Bytes, std::io::Error>(chunk)
        },
    ));

    reqwest::Body::wrap_stream(stream)
}

/// Splits a body into upload chunks, each paired with the cumulative fraction
/// sent once that chunk is out.
fn chunk_with_fractions(data: &Bytes) -> Vec<(Bytes, f64)> {
    let total = data.len();
    let mut chunks = Vec::with_capacity(total.div_ceil(UPLOAD_CHUNK));
    let mut offset = 0;
    while offset < total {
        let end = usize::min(offset + UPLOAD_CHUNK, total);
        chunks.push((data.slice(offset..end), end as f64 / total as f64));
        offset = end;
    }
    chunks
}

fn convert_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
    }
}

fn capture_head(response: &reqwest::Response) -> ResponseHead {
    ResponseHead {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect(),
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_redirect() {
        TransportError::TooManyRedirects
    } else if error.is_builder() {
        TransportError::InvalidUrl(error.to_string())
    } else {
        TransportError::ConnectionFailed(error.to_string())
    }
}
