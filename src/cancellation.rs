//! Cooperative cancellation threaded through the executor and pipeline.
//!
//! Nothing here preempts a running task; every suspension point (rate
//! limiter wait, retry delay, transport I/O, stream iteration) must race
//! itself against [`CancelToken::cancelled`] with `tokio::select!` (or poll
//! [`CancelToken::is_cancelled`] between non-yielding steps) and unwind with
//! [`crate::error::ErrorKind::Cancelled`] when it fires.

use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// Why a call was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller explicitly asked to stop.
    UserRequest,
    /// A deadline elapsed.
    Timeout,
    /// An unrecoverable error upstream forced cancellation.
    Error,
}

impl CancelReason {
    fn as_u8(self) -> u8 {
        match self {
            Self::UserRequest => 1,
            Self::Timeout => 2,
            Self::Error => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::UserRequest),
            2 => Some(Self::Timeout),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

type Callback = Box<dyn FnOnce(CancelReason) + Send>;

struct Inner {
    cancelled: AtomicBool,
    reason: AtomicU8,
    callbacks: Mutex<Vec<Callback>>,
}

/// A cooperative, idempotent cancel signal, cheaply cloneable and shared
/// across every component a single logical call touches.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: AtomicU8::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Cancels this token. Idempotent: only the first call transitions
    /// state and fires registered callbacks; subsequent calls are no-ops.
    pub fn cancel(&self, reason: CancelReason) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.reason.store(reason.as_u8(), Ordering::SeqCst);
            let callbacks = std::mem::take(&mut *self.inner.callbacks.lock().expect("cancel token lock poisoned"));
            for callback in callbacks {
                callback(reason);
            }
        }
    }

    /// Returns `true` once [`Self::cancel`] has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the reason cancellation fired for, if it has.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.is_cancelled() {
            return None;
        }
        CancelReason::from_u8(self.inner.reason.load(Ordering::SeqCst))
    }

    /// Resolves once this token is cancelled. Meant to be raced via
    /// `tokio::select!` against a suspension point (rate-limiter wait,
    /// retry delay, transport I/O) so that point unwinds promptly instead
    /// of only being checked between awaits.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(10));
        interval.tick().await;
        loop {
            if self.is_cancelled() {
                return;
            }
            interval.tick().await;
        }
    }

    /// Registers a callback to run exactly once, at the moment cancellation
    /// fires. If the token is already cancelled, runs it immediately.
    pub fn on_cancel(&self, callback: impl FnOnce(CancelReason) + Send + 'static) {
        if let Some(reason) = self.reason() {
            callback(reason);
            return;
        }
        let mut callbacks = self.inner.callbacks.lock().expect("cancel token lock poisoned");
        if let Some(reason) = self.reason() {
            drop(callbacks);
            callback(reason);
        } else {
            callbacks.push(Box::new(callback));
        }
    }
}

/// Wraps an event stream so that iteration yields a terminal item (via
/// `on_cancel_item`) and stops promptly once the token fires, releasing
/// the inner stream instead of continuing to poll it.
pub struct CancellableStream<T> {
    inner: Pin<Box<dyn Stream<Item = T> + Send>>,
    token: CancelToken,
    on_cancel_item: Option<Box<dyn FnOnce() -> T + Send>>,
    finished: bool,
}

impl<T> CancellableStream<T> {
    /// Wraps `inner`, observing `token`. `on_cancel_item` produces the one
    /// terminal item emitted when cancellation is observed.
    pub fn new(
        inner: impl Stream<Item = T> + Send + 'static,
        token: CancelToken,
        on_cancel_item: impl FnOnce() -> T + Send + 'static,
    ) -> Self {
        Self { inner: Box::pin(inner), token, on_cancel_item: Some(Box::new(on_cancel_item)), finished: false }
    }
}

impl<T> Stream for CancellableStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.token.is_cancelled() {
            this.finished = true;
            return match this.on_cancel_item.take() {
                Some(make_item) => Poll::Ready(Some(make_item())),
                None => Poll::Ready(None),
            };
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
