//! Integration tests for the operation pipeline over a scripted transport.
//!
//! No network involved: a mock transport plays back configured outcomes and
//! honors aborts, and spy fixtures injected per test record hook invocations
//! (no process-wide state).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use requestbox::delegate::{OperationContext, RequestDelegate};
use requestbox::dispatch::{InlineDispatcher, SharedDispatcher, SpawnDispatcher};
use requestbox::error::{RequestError, TransportError};
use requestbox::http::{HttpRequest, ResponseHead, basic_auth};
use requestbox::multipart::MultipartForm;
use requestbox::operation::{
    CompletionHandler, OperationError, OperationState, ProgressHandler, RequestOperation,
};
use requestbox::requestable::{RequestTarget, Requestable};
use requestbox::response::{ResponseEnvelope, serialize_json};
use requestbox::transport::{
    RawExchange, Transfer, Transport, TransportHandle, UploadSource,
};

// --- fixtures ---------------------------------------------------------------

/// Shared event log injected into services and delegates.
#[derive(Clone, Default)]
struct Spy {
    events: Arc<Mutex<Vec<String>>>,
}

impl Spy {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[derive(Clone)]
enum MockBehavior {
    Respond {
        status: u16,
        body: String,
        progress: Vec<f64>,
        delay: Duration,
    },
    Fail {
        error: TransportError,
    },
}

/// Transport double: plays back one scripted outcome per send, honors aborts,
/// and counts how often it was contacted.
struct MockTransport {
    behavior: MockBehavior,
    sends: AtomicUsize,
}

impl MockTransport {
    fn respond(status: u16, body: &str) -> Arc<Self> {
        Self::with_behavior(MockBehavior::Respond {
            status,
            body: body.to_string(),
            progress: Vec::new(),
            delay: Duration::ZERO,
        })
    }

    fn respond_slowly(status: u16, body: &str, delay: Duration) -> Arc<Self> {
        Self::with_behavior(MockBehavior::Respond {
            status,
            body: body.to_string(),
            progress: Vec::new(),
            delay,
        })
    }

    fn respond_with_progress(status: u16, body: &str, progress: Vec<f64>) -> Arc<Self> {
        Self::with_behavior(MockBehavior::Respond {
            status,
            body: body.to_string(),
            progress,
            delay: Duration::ZERO,
        })
    }

    fn fail(error: TransportError) -> Arc<Self> {
        Self::with_behavior(MockBehavior::Fail { error })
    }

    fn with_behavior(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            sends: AtomicUsize::new(0),
        })
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn send(&self, request: HttpRequest, transfer: Transfer) -> TransportHandle {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let (handle, controller) = TransportHandle::new_pair(transfer.reports_progress());
        let behavior = self.behavior.clone();

        tokio::spawn(async move {
            let started_at = Utc::now();

            let raw = match behavior {
                MockBehavior::Respond {
                    status,
                    body,
                    progress,
                    delay,
                } => {
                    for fraction in progress {
                        controller.report_progress(fraction);
                    }
                    tokio::select! {
                        _ = controller.aborter.aborted() => RawExchange {
                            request: Some(request),
                            response: None,
                            data: None,
                            error: Some(TransportError::Aborted),
                            started_at,
                            elapsed: Duration::ZERO,
                        },
                        _ = tokio::time::sleep(delay) => RawExchange {
                            request: Some(request),
                            response: Some(ResponseHead::new(status)),
                            data: Some(Bytes::from(body)),
                            error: None,
                            started_at,
                            elapsed: delay,
                        },
                    }
                }
                MockBehavior::Fail { error } => RawExchange {
                    request: Some(request),
                    response: None,
                    data: None,
                    error: Some(error),
                    started_at,
                    elapsed: Duration::ZERO,
                },
            };

            let _ = controller.outcome.send(raw);
        });

        handle
    }
}

/// JSON service used across the suite; the spy records its own hooks.
struct JsonService {
    target: RequestTarget,
    delegates: Vec<Arc<dyn RequestDelegate<JsonService>>>,
    spy: Spy,
    upload: Option<UploadSource>,
    download_to: Option<PathBuf>,
}

impl JsonService {
    fn new() -> Self {
        Self {
            target: RequestTarget::builder().url("https://api.example.com/things").build(),
            delegates: Vec::new(),
            spy: Spy::default(),
            upload: None,
            download_to: None,
        }
    }

    fn with_delegates(mut self, delegates: Vec<Arc<dyn RequestDelegate<JsonService>>>) -> Self {
        self.delegates = delegates;
        self
    }

    fn with_spy(mut self, spy: Spy) -> Self {
        self.spy = spy;
        self
    }

    fn with_multipart(mut self) -> Self {
        self.upload = Some(UploadSource::Multipart(
            MultipartForm::new().text("french", "français"),
        ));
        self
    }
}

#[async_trait]
impl Requestable for JsonService {
    type Response = Value;

    fn target(&self) -> RequestTarget {
        self.target.clone()
    }

    fn serialize(
        &self,
        request: Option<&HttpRequest>,
        response: Option<&ResponseHead>,
        data: Option<&Bytes>,
        error: Option<&TransportError>,
    ) -> Result<Value, RequestError> {
        serialize_json(request, response, data, error)
    }

    fn delegates(&self) -> Vec<Arc<dyn RequestDelegate<JsonService>>> {
        self.delegates.clone()
    }

    fn upload_source(&self) -> Option<UploadSource> {
        self.upload.clone()
    }

    fn destination(&self) -> Option<PathBuf> {
        self.download_to.clone()
    }

    async fn prepare(&self, request: HttpRequest, _operation: &OperationContext) -> HttpRequest {
        self.spy.record("requestable.prepare");
        request
    }

    async fn will_send(&self, _request: &HttpRequest, _operation: &OperationContext) {
        self.spy.record("requestable.will_send");
    }

    async fn did_transform(
        &self,
        response: ResponseEnvelope<Value>,
        _operation: &OperationContext,
    ) -> ResponseEnvelope<Value> {
        self.spy.record("requestable.did_transform");
        response
    }

    async fn did_succeed(&self, _value: &Value, _operation: &OperationContext) {
        self.spy.record("requestable.did_succeed");
    }

    async fn did_fail(&self, error: &RequestError, _operation: &OperationContext) {
        self.spy.record(format!("requestable.did_fail:{}", error));
    }
}

/// Records every hook under a given name.
struct SpyDelegate {
    name: &'static str,
    spy: Spy,
}

#[async_trait]
impl RequestDelegate<JsonService> for SpyDelegate {
    async fn prepare(
        &self,
        request: HttpRequest,
        _requestable: &JsonService,
        _operation: &OperationContext,
    ) -> HttpRequest {
        self.spy.record(format!("{}.prepare", self.name));
        request
    }

    async fn will_send(
        &self,
        _request: &HttpRequest,
        _requestable: &JsonService,
        _operation: &OperationContext,
    ) {
        self.spy.record(format!("{}.will_send", self.name));
    }

    async fn did_transform(
        &self,
        response: ResponseEnvelope<Value>,
        _requestable: &JsonService,
        _operation: &OperationContext,
    ) -> ResponseEnvelope<Value> {
        self.spy.record(format!("{}.did_transform", self.name));
        response
    }

    async fn did_succeed(
        &self,
        _value: &Value,
        _requestable: &JsonService,
        _operation: &OperationContext,
    ) {
        self.spy.record(format!("{}.did_succeed", self.name));
    }

    async fn did_fail(
        &self,
        _error: &RequestError,
        _requestable: &JsonService,
        _operation: &OperationContext,
    ) {
        self.spy.record(format!("{}.did_fail", self.name));
    }
}

/// Injects a basic-auth header during prepare.
struct AuthDelegate;

#[async_trait]
impl RequestDelegate<JsonService> for AuthDelegate {
    async fn prepare(
        &self,
        mut request: HttpRequest,
        _requestable: &JsonService,
        _operation: &OperationContext,
    ) -> HttpRequest {
        let (name, value) = basic_auth("user", "password");
        request.set_header(name, value);
        request
    }
}

/// Downgrades structurally successful responses missing a `message` field.
struct MessageValidator;

#[async_trait]
impl RequestDelegate<JsonService> for MessageValidator {
    async fn did_transform(
        &self,
        response: ResponseEnvelope<Value>,
        _requestable: &JsonService,
        _operation: &OperationContext,
    ) -> ResponseEnvelope<Value> {
        let acceptable = matches!(response.value(), Some(value) if value.get("message").is_some());
        if response.is_success() && !acceptable {
            return response.with_result(Err(RequestError::Validation(
                "payload has no message field".to_string(),
            )));
        }
        response
    }
}

/// What a completion handler observed, extracted for assertions.
#[derive(Debug, Clone)]
struct Delivered {
    result: Result<Value, RequestError>,
    status: Option<u16>,
    request: Option<HttpRequest>,
}

fn completion_channel() -> (CompletionHandler<Value>, mpsc::UnboundedReceiver<Delivered>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: CompletionHandler<Value> = Arc::new(move |envelope| {
        let _ = tx.send(Delivered {
            result: envelope.result.clone(),
            status: envelope.status(),
            request: envelope.request.clone(),
        });
    });
    (handler, rx)
}

fn spawn_context() -> SharedDispatcher {
    Arc::new(SpawnDispatcher)
}

async fn recv_delivery(rx: &mut mpsc::UnboundedReceiver<Delivered>) -> Delivered {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("completion channel closed")
}

async fn wait_finished<R: Requestable>(operation: &RequestOperation<R>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while operation.state() != OperationState::Finished {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("operation never finished");
}

async fn assert_no_second_delivery(rx: &mut mpsc::UnboundedReceiver<Delivered>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "completion delivered more than once");
}

// --- tests ------------------------------------------------------------------

#[tokio::test]
async fn test_plain_request_delivers_typed_success() {
    let transport = MockTransport::respond(200, r#"{"message":"hi"}"#);
    let (handler, mut rx) = completion_channel();

    let operation = RequestOperation::request(
        Arc::new(JsonService::new()),
        transport.clone(),
        spawn_context(),
        Some(handler),
    );
    operation.start();

    let delivered = recv_delivery(&mut rx).await;
    assert_eq!(delivered.result, Ok(json!({"message": "hi"})));
    assert_eq!(delivered.status, Some(200));
    assert_eq!(transport.sends(), 1);

    wait_finished(&operation).await;
    assert_no_second_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_start_twice_delivers_once() {
    let transport = MockTransport::respond(200, r#"{"message":"hi"}"#);
    let (handler, mut rx) = completion_channel();

    let operation = RequestOperation::request(
        Arc::new(JsonService::new()),
        transport.clone(),
        spawn_context(),
        Some(handler),
    );
    operation.start();
    operation.start();

    let delivered = recv_delivery(&mut rx).await;
    assert!(delivered.result.is_ok());
    assert_eq!(transport.sends(), 1);
    assert_no_second_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_concurrent_cancels_yield_exactly_one_delivery() {
    let transport = MockTransport::respond_slowly(
        200,
        r#"{"message":"hi"}"#,
        Duration::from_millis(100),
    );
    let (handler, mut rx) = completion_channel();

    let operation = Arc::new(RequestOperation::request(
        Arc::new(JsonService::new()),
        transport,
        spawn_context(),
        Some(handler),
    ));
    operation.start();

    let mut cancels = Vec::new();
    for _ in 0..8 {
        let op = operation.clone();
        cancels.push(tokio::spawn(async move { op.cancel() }));
    }
    for cancel in cancels {
        cancel.await.unwrap();
    }

    let delivered = recv_delivery(&mut rx).await;
    assert_eq!(delivered.result, Err(RequestError::Cancelled));

    wait_finished(&operation).await;
    assert_no_second_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_hook_order_is_stable() {
    for _ in 0..3 {
        let spy = Spy::default();
        let delegates: Vec<Arc<dyn RequestDelegate<JsonService>>> = vec![
            Arc::new(SpyDelegate { name: "a", spy: spy.clone() }),
            Arc::new(SpyDelegate { name: "b", spy: spy.clone() }),
        ];
        let service = JsonService::new().with_delegates(delegates).with_spy(spy.clone());

        let transport = MockTransport::respond(200, r#"{"message":"hi"}"#);
        let (handler, mut rx) = completion_channel();
        let operation = RequestOperation::request(
            Arc::new(service),
            transport,
            spawn_context(),
            Some(handler),
        );
        operation.start();

        recv_delivery(&mut rx).await;
        wait_finished(&operation).await;

        assert_eq!(
            spy.events(),
            vec![
                "requestable.prepare",
                "a.prepare",
                "b.prepare",
                "requestable.will_send",
                "a.will_send",
                "b.will_send",
                "a.did_transform",
                "b.did_transform",
                "requestable.did_transform",
                "a.did_succeed",
                "b.did_succeed",
                "requestable.did_succeed",
            ]
        );
    }
}

#[tokio::test]
async fn test_prepare_injects_auth_header() {
    let service = JsonService::new()
        .with_delegates(vec![Arc::new(AuthDelegate)]);
    let transport = MockTransport::respond(200, r#"{"message":"hi"}"#);
    let (handler, mut rx) = completion_channel();

    let operation = RequestOperation::request(
        Arc::new(service),
        transport,
        spawn_context(),
        Some(handler),
    );
    operation.start();

    let delivered = recv_delivery(&mut rx).await;
    let request = delivered.request.expect("raw request should be echoed back");
    assert_eq!(
        request.header("Authorization"),
        Some("Basic dXNlcjpwYXNzd29yZA==")
    );
}

#[tokio::test]
async fn test_transport_failure_reaches_handler_and_fail_hook() {
    let spy = Spy::default();
    let service = JsonService::new().with_spy(spy.clone());
    let transport =
        MockTransport::fail(TransportError::ConnectionFailed("server".to_string()));
    let (handler, mut rx) = completion_channel();

    let operation = RequestOperation::request(
        Arc::new(service),
        transport,
        spawn_context(),
        Some(handler),
    );
    operation.start();

    let delivered = recv_delivery(&mut rx).await;
    let expected = RequestError::Transport(TransportError::ConnectionFailed(
        "server".to_string(),
    ));
    assert_eq!(delivered.result, Err(expected.clone()));

    wait_finished(&operation).await;
    // The terminal hook observed the same error the handler received.
    assert!(
        spy.events()
            .contains(&format!("requestable.did_fail:{}", expected))
    );
}

#[tokio::test]
async fn test_cancel_before_start_never_contacts_transport() {
    let transport = MockTransport::respond(200, r#"{"message":"hi"}"#);
    let (handler, mut rx) = completion_channel();

    let operation = RequestOperation::request(
        Arc::new(JsonService::new()),
        transport.clone(),
        spawn_context(),
        Some(handler),
    );
    operation.cancel();
    operation.start();

    let delivered = recv_delivery(&mut rx).await;
    assert_eq!(delivered.result, Err(RequestError::Cancelled));
    assert_eq!(delivered.status, None);
    assert_eq!(transport.sends(), 0);
    assert_eq!(operation.state(), OperationState::Finished);
    assert_no_second_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_repeated_cancel_matches_single_cancel() {
    let transport = MockTransport::respond(200, r#"{"message":"hi"}"#);
    let (handler, mut rx) = completion_channel();

    let operation = RequestOperation::request(
        Arc::new(JsonService::new()),
        transport.clone(),
        spawn_context(),
        Some(handler),
    );
    for _ in 0..5 {
        operation.cancel();
    }
    operation.start();
    // Cancelling after the fact changes nothing either.
    operation.cancel();

    let delivered = recv_delivery(&mut rx).await;
    assert_eq!(delivered.result, Err(RequestError::Cancelled));
    assert_eq!(transport.sends(), 0);
    assert_no_second_delivery(&mut rx).await;
}

#[tokio::test]
async fn test_copy_runs_independently() {
    let transport = MockTransport::respond(200, r#"{"message":"hi"}"#);
    let (handler, mut rx) = completion_channel();

    let original = RequestOperation::request(
        Arc::new(JsonService::new()),
        transport.clone(),
        spawn_context(),
        Some(handler),
    );

    // A cancelled copy leaves the original untouched.
    let cancelled_copy = original.copy();
    cancelled_copy.cancel();
    assert!(!original.is_cancelled());
    assert_ne!(cancelled_copy.id(), original.id());

    original.start();
    let delivered = recv_delivery(&mut rx).await;
    assert_eq!(delivered.result, Ok(json!({"message": "hi"})));

    // A copy shares configuration (including the handler) but not state: given
    // the same transport outcome it produces the same value independently.
    let fresh_copy = original.copy();
    assert_eq!(fresh_copy.state(), OperationState::Idle);
    fresh_copy.start();
    let copied = recv_delivery(&mut rx).await;
    assert_eq!(copied.result, delivered.result);

    // The pre-cancelled copy still delivers its own cancellation through the
    // shared handler.
    cancelled_copy.start();
    let cancelled = recv_delivery(&mut rx).await;
    assert_eq!(cancelled.result, Err(RequestError::Cancelled));
}

#[tokio::test]
async fn test_upload_progress_is_monotone_and_precedes_completion() {
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let progress_events = events.clone();
    let progress = ProgressHandler {
        handler: Arc::new(move |fraction| {
            progress_events.lock().unwrap().push(format!("progress:{}", fraction));
        }),
        context: Arc::new(InlineDispatcher),
    };

    let completion_events = events.clone();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let handler: CompletionHandler<Value> = Arc::new(move |envelope| {
        completion_events.lock().unwrap().push("completion".to_string());
        let _ = done_tx.send(envelope.result.clone());
    });

    let transport = MockTransport::respond_with_progress(
        200,
        r#"{"message":"hi"}"#,
        vec![0.2, 0.5, 1.0],
    );
    let operation = RequestOperation::upload(
        Arc::new(JsonService::new().with_multipart()),
        transport,
        Some(progress),
        Arc::new(InlineDispatcher),
        Some(handler),
    )
    .unwrap();
    operation.start();

    let result = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert!(result.is_ok());

    // Every fraction is forwarded, in order, strictly before the completion.
    let log = events.lock().unwrap().clone();
    assert_eq!(
        log,
        vec!["progress:0.2", "progress:0.5", "progress:1", "completion"]
    );
}

#[tokio::test]
async fn test_upload_without_body_is_rejected() {
    let result = RequestOperation::upload(
        Arc::new(JsonService::new()),
        MockTransport::respond(200, "{}"),
        None,
        spawn_context(),
        None,
    );
    assert!(matches!(result, Err(OperationError::MissingUploadBody)));
}

#[tokio::test]
async fn test_download_without_destination_is_rejected() {
    let result = RequestOperation::download(
        Arc::new(JsonService::new()),
        MockTransport::respond(200, "{}"),
        None,
        spawn_context(),
        None,
    );
    assert!(matches!(result, Err(OperationError::MissingDestination)));
}

#[tokio::test]
async fn test_panicking_serializer_still_completes() {
    struct PanicService;

    #[async_trait]
    impl Requestable for PanicService {
        type Response = Value;

        fn target(&self) -> RequestTarget {
            RequestTarget::builder().url("https://api.example.com/boom").build()
        }

        fn serialize(
            &self,
            _request: Option<&HttpRequest>,
            _response: Option<&ResponseHead>,
            _data: Option<&Bytes>,
            _error: Option<&TransportError>,
        ) -> Result<Value, RequestError> {
            panic!("serializer bug")
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: CompletionHandler<Value> = Arc::new(move |envelope| {
        let _ = tx.send(envelope.result.clone());
    });

    let operation = RequestOperation::request(
        Arc::new(PanicService),
        MockTransport::respond(200, "{}"),
        spawn_context(),
        Some(handler),
    );
    operation.start();

    let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    match result {
        Err(RequestError::Serialization(reason)) => assert!(reason.contains("serializer bug")),
        other => panic!("expected serialization failure, got {:?}", other),
    }

    wait_finished(&operation).await;
}

#[tokio::test]
async fn test_validation_delegate_downgrades_success() {
    let spy = Spy::default();
    let service = JsonService::new()
        .with_delegates(vec![Arc::new(MessageValidator)])
        .with_spy(spy.clone());

    // Structurally fine JSON, but no `message` field.
    let transport = MockTransport::respond(200, r#"{"other":1}"#);
    let (handler, mut rx) = completion_channel();

    let operation = RequestOperation::request(
        Arc::new(service),
        transport,
        spawn_context(),
        Some(handler),
    );
    operation.start();

    let delivered = recv_delivery(&mut rx).await;
    assert!(matches!(delivered.result, Err(RequestError::Validation(_))));

    wait_finished(&operation).await;
    let events = spy.events();
    assert!(events.iter().any(|e| e.starts_with("requestable.did_fail")));
    assert!(!events.contains(&"requestable.did_succeed".to_string()));
}
