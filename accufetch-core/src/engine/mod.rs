//! Request accumulation and single-flight batch dispatch.
//!
//! Callers submit requests one at a time. While a batch is on the wire,
//! new submissions accumulate; as soon as the batch returns, everything
//! accumulated goes out as the next batch.
//!
//! # Architecture
//!
//! ```text
//!   submit() ──► ┌──────────────┐   swap    ┌──────────────┐
//!                │   incoming   │ ◄───────► │   dispatch   │
//!                └──────────────┘           └──────┬───────┘
//!                                                  │ &[Req]
//!                                          ┌───────▼───────┐
//!                                          │ Dispatch loop │ ← one task,
//!                                          └───────┬───────┘   one batch at a time
//!                                                  │
//!                                          ┌───────▼───────┐
//!                                          │   Transport   │
//!                                          └───────────────┘
//! ```
//!
//! # Loop states
//!
//! - **Waiting**: both queues empty, or the interrupt flag is set
//! - **Dispatching**: a batch is with the transport
//! - **Closed**: terminal; every queued call was rejected with `Cancelled`
//!
//! A failed batch sets the interrupt flag and stays queued. It is retried,
//! unchanged, once the application calls `set_interrupted(false)`.

mod dispatch;
mod queue;

pub use queue::PendingResponse;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::transport::{ErrorHandler, Tagged, Transport};

use queue::{result_slot, QueuePair};

/// State of the dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Idle: nothing queued, or interrupted
    Waiting,
    /// A batch is in flight
    Dispatching,
    /// The loop has terminated
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Waiting => write!(f, "waiting"),
            EngineState::Dispatching => write!(f, "dispatching"),
            EngineState::Closed => write!(f, "closed"),
        }
    }
}

/// Mutable engine state, guarded by one mutex.
pub(crate) struct Inner<Req, Resp> {
    queues: QueuePair<Req, Resp>,
    interrupted: bool,
    /// Set only while the loop is suspended in `Waiting`.
    waker: Option<oneshot::Sender<()>>,
}

impl<Req, Resp> Inner<Req, Resp> {
    fn must_wait(&self, closing: bool) -> bool {
        !closing && (self.queues.is_empty() || self.interrupted)
    }
}

/// State shared between the handle and the dispatch loop.
pub(crate) struct Shared<T: Transport> {
    name: String,
    transport: T,
    handler: Box<dyn ErrorHandler>,
    cancel: CancellationToken,
    inner: Mutex<Inner<T::Request, T::Response>>,
    state: watch::Sender<EngineState>,
    metrics: Arc<EngineMetrics>,
}

impl<T: Transport> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T::Request, T::Response>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!(engine = %self.name, from = %previous, to = %state, "State change");
        }
    }

    /// Resume the loop if it is suspended and the wait condition no longer
    /// holds. Uses the same predicate the loop evaluated before suspending.
    fn wake_maybe(&self, inner: &mut Inner<T::Request, T::Response>) {
        if inner.waker.is_some() && !inner.must_wait(self.is_closing()) {
            if let Some(waker) = inner.waker.take() {
                let _ = waker.send(());
            }
        }
    }

    /// Reject everything still queued (not the in-flight batch) with
    /// `Cancelled` and let the loop observe the shutdown.
    fn cancel_queued(&self) {
        let mut inner = self.lock();
        let cancelled = inner.queues.reject_all(FetchError::Cancelled);
        if cancelled > 0 {
            self.metrics.record_cancelled(cancelled);
            debug!(engine = %self.name, cancelled, "Rejected queued requests");
        }
        self.wake_maybe(&mut inner);
    }
}

/// Batching engine handle.
///
/// Owns a background dispatch task that sends at most one batch at a time
/// through `T`. Dropping the handle closes the engine.
pub struct AccumulatedFetching<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> AccumulatedFetching<T> {
    /// Create an engine with default configuration and start its loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(transport: T, handler: impl ErrorHandler) -> Self {
        Self::with_config(transport, handler, EngineConfig::default())
    }

    /// Create an engine with the given configuration.
    pub fn with_config(transport: T, handler: impl ErrorHandler, config: EngineConfig) -> Self {
        Self::with_cancellation(transport, handler, config, CancellationToken::new())
    }

    /// Create an engine bound to an existing cancellation token. Cancelling
    /// the token from outside has the same effect as [`close`](Self::close).
    pub fn with_cancellation(
        transport: T,
        handler: impl ErrorHandler,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Waiting);
        let shared = Arc::new(Shared {
            name: config.name,
            transport,
            handler: Box::new(handler),
            cancel,
            inner: Mutex::new(Inner {
                queues: QueuePair::default(),
                interrupted: config.start_interrupted,
                waker: None,
            }),
            state,
            metrics: Arc::new(EngineMetrics::new()),
        });

        info!(
            engine = %shared.name,
            interrupted = config.start_interrupted,
            "Starting batching engine"
        );

        tokio::spawn(dispatch::run(Arc::clone(&shared)));

        Self { shared }
    }

    /// Queue a request for the next batch.
    ///
    /// The request is queued before this returns; the returned future only
    /// waits for the outcome. Fails immediately with `Cancelled` if the
    /// engine is closing.
    pub fn submit(&self, request: T::Request) -> PendingResponse<T::Response> {
        let mut inner = self.shared.lock();
        if self.shared.is_closing() {
            self.shared.metrics.record_rejected();
            return PendingResponse::rejected(FetchError::Cancelled);
        }

        trace!(engine = %self.shared.name, kind = request.kind(), "Request enqueued");

        let (slot, pending) = result_slot();
        inner.queues.enqueue(request, slot);
        self.shared.metrics.record_submitted();
        self.shared.wake_maybe(&mut inner);
        pending
    }

    /// Like [`submit`](Self::submit), but gives up with `Aborted` when
    /// `abort` fires first. The request stays in its batch; its response is
    /// discarded.
    pub fn submit_cancellable(
        &self,
        request: T::Request,
        abort: CancellationToken,
    ) -> impl Future<Output = Result<T::Response, FetchError>> + Send + 'static {
        let pending = self.submit(request);
        async move {
            tokio::select! {
                biased;
                result = pending => result,
                _ = abort.cancelled() => Err(FetchError::Aborted),
            }
        }
    }

    /// Pause or resume dispatching. A batch already in flight is unaffected.
    pub fn set_interrupted(&self, interrupted: bool) -> Result<(), FetchError> {
        if self.shared.is_closing() {
            return Err(FetchError::Cancelled);
        }
        let mut inner = self.shared.lock();
        if inner.interrupted != interrupted {
            debug!(engine = %self.shared.name, interrupted, "Interrupt flag changed");
        }
        inner.interrupted = interrupted;
        self.shared.wake_maybe(&mut inner);
        Ok(())
    }

    /// Close the engine. Idempotent.
    ///
    /// Queued requests are rejected with `Cancelled` right away. A batch
    /// already in flight completes with whatever the transport returns.
    pub fn close(&self) {
        if !self.shared.is_closing() {
            info!(engine = %self.shared.name, "Closing batching engine");
        }
        self.shared.cancel.cancel();
        self.shared.cancel_queued();
    }

    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.lock().interrupted
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.borrow()
    }

    /// Number of requests waiting in either queue (not counting a batch in
    /// flight)
    pub fn queued(&self) -> usize {
        self.shared.lock().queues.queued()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }

    /// Wait until the loop reaches `state`.
    pub async fn wait_for_state(&self, state: EngineState) {
        let mut rx = self.subscribe_state();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Wait until the loop has terminated.
    pub async fn closed(&self) {
        self.wait_for_state(EngineState::Closed).await
    }

    /// The token shared with the transport. Cancelling it closes the engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<T: Transport> fmt::Debug for AccumulatedFetching<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatedFetching")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Drop for AccumulatedFetching<T> {
    fn drop(&mut self) {
        self.close();
    }
}
