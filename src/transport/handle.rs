use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc, oneshot};

use super::types::RawExchange;

/// Progress events are lossy; a slow consumer drops fractions, never blocks
/// the transfer.
const PROGRESS_BUFFER: usize = 64;

/// Best-effort cancellation signal shared between an operation and its
/// transport.
///
/// Aborting is advisory: a transfer that already completed reports its real
/// outcome regardless.
#[derive(Debug, Clone, Default)]
pub struct Aborter {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Aborter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the abort. Idempotent, callable from any thread.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Resolves once an abort has been requested.
    pub async fn aborted(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so an abort between the check and
        // the await cannot be missed.
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

/// The operation's end of one exchange.
pub struct TransportHandle {
    pub(crate) outcome: oneshot::Receiver<RawExchange>,
    pub(crate) progress: Option<mpsc::Receiver<f64>>,
    pub(crate) aborter: Aborter,
}

/// The transport's end: report progress, then the outcome, exactly once.
pub struct TransportController {
    pub outcome: oneshot::Sender<RawExchange>,
    pub progress: Option<mpsc::Sender<f64>>,
    pub aborter: Aborter,
}

impl TransportHandle {
    /// Creates both ends of an exchange. The controller goes to whatever
    /// drives the actual I/O; the handle stays with the operation.
    pub fn new_pair(with_progress: bool) -> (TransportHandle, TransportController) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = if with_progress {
            let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let aborter = Aborter::new();

        let handle = TransportHandle {
            outcome: outcome_rx,
            progress: progress_rx,
            aborter: aborter.clone(),
        };
        let controller = TransportController {
            outcome: outcome_tx,
            progress: progress_tx,
            aborter,
        };
        (handle, controller)
    }

    pub fn aborter(&self) -> &Aborter {
        &self.aborter
    }
}

impl TransportController {
    /// Reports a progress fraction, dropping it if the consumer lags.
    pub fn report_progress(&self, fraction: f64) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(fraction.clamp(0.0, 1.0));
        }
    }
}
