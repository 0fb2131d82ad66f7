use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::state::{Lifecycle, OperationState, StartDecision};
use crate::delegate::{OperationContext, OperationKind, RequestDelegate};
use crate::dispatch::SharedDispatcher;
use crate::http::HttpRequest;
use crate::requestable::Requestable;
use crate::response::{ResponseEnvelope, serialize_exchange};
use crate::transport::{RawExchange, Transfer, Transport, TransportHandle};

/// Receives the final envelope, exactly once, on the completion context.
pub type CompletionHandler<T> = Arc<dyn Fn(&ResponseEnvelope<T>) + Send + Sync>;

/// Receives progress fractions on its own context.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// A progress callback together with the context it is delivered on.
#[derive(Clone)]
pub struct ProgressHandler {
    pub handler: ProgressFn,
    pub context: SharedDispatcher,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("requestable carries no upload body")]
    MissingUploadBody,

    #[error("requestable carries no download destination")]
    MissingDestination,
}

/// A single-use, cancellable unit of request work.
///
/// Construct via [`request`](RequestOperation::request),
/// [`upload`](RequestOperation::upload) or
/// [`download`](RequestOperation::download) — one state machine, three
/// transfer shapes. `start()` is meaningful once; `cancel()` is safe from any
/// thread at any time; every started operation delivers exactly one envelope.
pub struct RequestOperation<R: Requestable> {
    id: Uuid,
    requestable: Arc<R>,
    transport: Arc<dyn Transport>,
    transfer: Transfer,
    progress: Option<ProgressHandler>,
    completion_context: SharedDispatcher,
    completion: Option<CompletionHandler<R::Response>>,
    lifecycle: Arc<Lifecycle>,
}

impl<R: Requestable> RequestOperation<R> {
    /// Plain request/response operation.
    pub fn request(
        requestable: Arc<R>,
        transport: Arc<dyn Transport>,
        completion_context: SharedDispatcher,
        completion: Option<CompletionHandler<R::Response>>,
    ) -> Self {
        Self::new(
            requestable,
            transport,
            Transfer::Data,
            None,
            completion_context,
            completion,
        )
    }

    /// Upload operation; the body comes from the requestable's
    /// [`upload_source`](Requestable::upload_source).
    pub fn upload(
        requestable: Arc<R>,
        transport: Arc<dyn Transport>,
        progress: Option<ProgressHandler>,
        completion_context: SharedDispatcher,
        completion: Option<CompletionHandler<R::Response>>,
    ) -> Result<Self, OperationError> {
        let source = requestable
            .upload_source()
            .ok_or(OperationError::MissingUploadBody)?;
        Ok(Self::new(
            requestable,
            transport,
            Transfer::Upload(source),
            progress,
            completion_context,
            completion,
        ))
    }

    /// Download operation; the destination comes from the requestable's
    /// [`destination`](Requestable::destination).
    pub fn download(
        requestable: Arc<R>,
        transport: Arc<dyn Transport>,
        progress: Option<ProgressHandler>,
        completion_context: SharedDispatcher,
        completion: Option<CompletionHandler<R::Response>>,
    ) -> Result<Self, OperationError> {
        let destination = requestable
            .destination()
            .ok_or(OperationError::MissingDestination)?;
        Ok(Self::new(
            requestable,
            transport,
            Transfer::Download(destination),
            progress,
            completion_context,
            completion,
        ))
    }

    fn new(
        requestable: Arc<R>,
        transport: Arc<dyn Transport>,
        transfer: Transfer,
        progress: Option<ProgressHandler>,
        completion_context: SharedDispatcher,
        completion: Option<CompletionHandler<R::Response>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requestable,
            transport,
            transfer,
            progress,
            completion_context,
            completion,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> OperationState {
        self.lifecycle.state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    pub fn kind(&self) -> OperationKind {
        match self.transfer {
            Transfer::Data => OperationKind::Request,
            Transfer::Upload(_) => OperationKind::Upload,
            Transfer::Download(_) => OperationKind::Download,
        }
    }

    /// Starts the operation. No-op unless Idle; a pre-cancelled operation
    /// transitions straight to Finished and delivers one `Cancelled` failure
    /// without ever contacting the transport.
    pub fn start(&self) {
        match self.lifecycle.try_begin() {
            StartDecision::Ignored => {
                tracing::debug!(id = %self.id, "start ignored; operation is not idle");
            }
            StartDecision::CancelledBeforeStart => {
                tracing::debug!(id = %self.id, "cancelled before start; delivering cancellation");
                let driver = self.driver();
                tokio::spawn(async move { driver.run_cancelled().await });
            }
            StartDecision::Run => {
                tracing::debug!(id = %self.id, kind = ?self.kind(), "operation started");
                let driver = self.driver();
                tokio::spawn(async move { driver.run().await });
            }
        }
    }

    /// Requests cancellation. Safe and idempotent from any thread and state.
    /// While executing this forwards a best-effort abort to the transport; the
    /// operation still finishes through its normal terminal path.
    pub fn cancel(&self) {
        tracing::debug!(id = %self.id, "cancel requested");
        self.lifecycle.cancel();
    }

    /// A fresh Idle operation with identical configuration and independent
    /// state. In-flight transport handles are never shared.
    pub fn copy(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            requestable: self.requestable.clone(),
            transport: self.transport.clone(),
            transfer: self.transfer.clone(),
            progress: self.progress.clone(),
            completion_context: self.completion_context.clone(),
            completion: self.completion.clone(),
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    fn driver(&self) -> Driver<R> {
        Driver {
            operation: OperationContext {
                id: self.id,
                kind: self.kind(),
            },
            requestable: self.requestable.clone(),
            transport: self.transport.clone(),
            transfer: self.transfer.clone(),
            progress: self.progress.clone(),
            completion_context: self.completion_context.clone(),
            completion: self.completion.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

/// Owns one terminal pass through the pipeline on a spawned task.
struct Driver<R: Requestable> {
    operation: OperationContext,
    requestable: Arc<R>,
    transport: Arc<dyn Transport>,
    transfer: Transfer,
    progress: Option<ProgressHandler>,
    completion_context: SharedDispatcher,
    completion: Option<CompletionHandler<R::Response>>,
    lifecycle: Arc<Lifecycle>,
}

impl<R: Requestable> Driver<R> {
    /// prepare -> send -> will_send -> (suspend) -> serialize ->
    /// did_transform -> deliver, strictly in order, exactly once.
    async fn run(self) {
        let delegates = self.requestable.delegates();

        let mut request = self.requestable.target().to_request();
        request = self.requestable.prepare(request, &self.operation).await;
        for delegate in &delegates {
            request = delegate
                .prepare(request, &self.requestable, &self.operation)
                .await;
        }

        let handle = self.transport.send(request.clone(), self.transfer.clone());
        let TransportHandle {
            outcome,
            progress,
            aborter,
        } = handle;
        self.lifecycle.attach_aborter(aborter);

        self.requestable.will_send(&request, &self.operation).await;
        for delegate in &delegates {
            delegate
                .will_send(&request, &self.requestable, &self.operation)
                .await;
        }

        let raw = self.await_outcome(outcome, progress, &request).await;

        let mut envelope = serialize_exchange(self.requestable.as_ref(), raw);
        for delegate in &delegates {
            envelope = delegate
                .did_transform(envelope, &self.requestable, &self.operation)
                .await;
        }
        envelope = self
            .requestable
            .did_transform(envelope, &self.operation)
            .await;

        self.deliver(envelope, &delegates).await;
        self.lifecycle.finish();
        tracing::debug!(id = %self.operation.id, "operation finished");
    }

    /// Terminal pass for an operation cancelled before start: the transform
    /// chain and delivery run on a synthetic cancellation envelope; the
    /// transport is never contacted.
    async fn run_cancelled(self) {
        let delegates = self.requestable.delegates();

        let mut envelope = ResponseEnvelope::cancelled();
        for delegate in &delegates {
            envelope = delegate
                .did_transform(envelope, &self.requestable, &self.operation)
                .await;
        }
        envelope = self
            .requestable
            .did_transform(envelope, &self.operation)
            .await;

        self.deliver(envelope, &delegates).await;
        tracing::debug!(id = %self.operation.id, "operation finished without contacting the transport");
    }

    /// Suspends until the transport reports, forwarding progress fractions as
    /// they arrive. The progress channel is drained before returning so no
    /// progress job is enqueued after the completion job.
    async fn await_outcome(
        &self,
        mut outcome: tokio::sync::oneshot::Receiver<RawExchange>,
        progress: Option<tokio::sync::mpsc::Receiver<f64>>,
        request: &HttpRequest,
    ) -> RawExchange {
        let abandoned = || RawExchange::abandoned(Some(request.clone()));

        let Some(mut rx) = progress else {
            return outcome.await.unwrap_or_else(|_| abandoned());
        };

        let mut received = None;
        loop {
            tokio::select! {
                out = &mut outcome => {
                    received = Some(out);
                    break;
                }
                fraction = rx.recv() => match fraction {
                    Some(fraction) => self.forward_progress(fraction),
                    // Progress side closed; only the outcome remains.
                    None => break,
                },
            }
        }

        match received {
            Some(out) => {
                // Flush fractions that raced in ahead of the outcome so none
                // trail the completion dispatch.
                while let Ok(fraction) = rx.try_recv() {
                    self.forward_progress(fraction);
                }
                out.unwrap_or_else(|_| abandoned())
            }
            None => outcome.await.unwrap_or_else(|_| abandoned()),
        }
    }

    fn forward_progress(&self, fraction: f64) {
        if let Some(progress) = &self.progress {
            let handler = progress.handler.clone();
            progress
                .context
                .dispatch(Box::new(move || handler(fraction)));
        }
    }

    /// Enqueues the completion handler on its context, then runs the terminal
    /// hooks on this task. Both observe the same envelope.
    async fn deliver(
        &self,
        envelope: ResponseEnvelope<R::Response>,
        delegates: &[Arc<dyn RequestDelegate<R>>],
    ) {
        let envelope = Arc::new(envelope);

        if let Some(handler) = &self.completion {
            let handler = handler.clone();
            let shared = envelope.clone();
            self.completion_context
                .dispatch(Box::new(move || handler(&shared)));
        }

        match &envelope.result {
            Ok(value) => {
                for delegate in delegates {
                    delegate
                        .did_succeed(value, &self.requestable, &self.operation)
                        .await;
                }
                self.requestable.did_succeed(value, &self.operation).await;
            }
            Err(error) => {
                tracing::debug!(id = %self.operation.id, error = %error, "operation failed");
                for delegate in delegates {
                    delegate
                        .did_fail(error, &self.requestable, &self.operation)
                        .await;
                }
                self.requestable.did_fail(error, &self.operation).await;
            }
        }
    }
}
