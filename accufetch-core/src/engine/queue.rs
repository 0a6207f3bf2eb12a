//! Double-buffered call queues and the single-assignment result slot.
//!
//! A queue keeps requests and their result slots side by side, so the
//! dispatch loop can hand `&[Req]` straight to the transport without
//! copying the requests out.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::FetchError;

/// Sender half of a caller's pending response. Consumed on settlement, so it
/// can be written at most once.
pub(crate) type ResultSlot<Resp> = oneshot::Sender<Result<Resp, FetchError>>;

/// Create a result slot and the future observing it.
pub(crate) fn result_slot<Resp>() -> (ResultSlot<Resp>, PendingResponse<Resp>) {
    let (tx, rx) = oneshot::channel();
    (tx, PendingResponse { inner: PendingInner::Waiting(rx) })
}

/// Ordered calls waiting for, or taking part in, one batch.
pub(crate) struct CallQueue<Req, Resp> {
    requests: Vec<Req>,
    slots: Vec<ResultSlot<Resp>>,
}

impl<Req, Resp> Default for CallQueue<Req, Resp> {
    fn default() -> Self {
        Self { requests: Vec::new(), slots: Vec::new() }
    }
}

impl<Req, Resp> CallQueue<Req, Resp> {
    pub(crate) fn push(&mut self, request: Req, slot: ResultSlot<Resp>) {
        self.requests.push(request);
        self.slots.push(slot);
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn requests(&self) -> &[Req] {
        &self.requests
    }

    /// Settle every slot with its positional response, leaving the queue
    /// empty (capacity is kept for reuse).
    ///
    /// The caller has already checked that the lengths match. Returns how
    /// many callers were still listening.
    pub(crate) fn resolve_all(&mut self, responses: Vec<Resp>) -> usize {
        debug_assert_eq!(responses.len(), self.slots.len());
        self.requests.clear();
        let mut delivered = 0;
        for (slot, response) in self.slots.drain(..).zip(responses) {
            if slot.send(Ok(response)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Settle every slot with `error`, leaving the queue empty.
    /// Returns the number of calls that were settled.
    pub(crate) fn reject_all(&mut self, error: FetchError) -> usize {
        let count = self.slots.len();
        self.requests.clear();
        for slot in self.slots.drain(..) {
            // Receiver gone means the caller stopped waiting.
            let _ = slot.send(Err(error.clone()));
        }
        count
    }
}

/// The rotating pair of buffers: calls land in `incoming`, the dispatch loop
/// sends from `dispatch`.
pub(crate) struct QueuePair<Req, Resp> {
    incoming: CallQueue<Req, Resp>,
    dispatch: CallQueue<Req, Resp>,
}

impl<Req, Resp> Default for QueuePair<Req, Resp> {
    fn default() -> Self {
        Self { incoming: CallQueue::default(), dispatch: CallQueue::default() }
    }
}

impl<Req, Resp> QueuePair<Req, Resp> {
    pub(crate) fn enqueue(&mut self, request: Req, slot: ResultSlot<Resp>) {
        self.incoming.push(request, slot);
    }

    /// Both buffers empty. An in-flight batch is owned by the dispatch loop
    /// and does not count.
    pub(crate) fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.dispatch.is_empty()
    }

    pub(crate) fn queued(&self) -> usize {
        self.incoming.len() + self.dispatch.len()
    }

    /// Make the accumulated incoming calls the next batch, unless a batch
    /// left over from a failed attempt is still waiting to be retried.
    /// Exchanges the buffers; no call is moved.
    pub(crate) fn swap_if_dispatch_empty(&mut self) {
        if self.dispatch.is_empty() {
            std::mem::swap(&mut self.incoming, &mut self.dispatch);
        }
    }

    /// Move the dispatch buffer out for the duration of a transport call.
    pub(crate) fn take_dispatch(&mut self) -> CallQueue<Req, Resp> {
        std::mem::take(&mut self.dispatch)
    }

    /// Put a batch (retained after failure, or emptied after success) back
    /// into the dispatch position.
    pub(crate) fn restore_dispatch(&mut self, batch: CallQueue<Req, Resp>) {
        debug_assert!(self.dispatch.is_empty(), "dispatch buffer refilled while a batch was in flight");
        self.dispatch = batch;
    }

    /// Reject every queued call in both buffers.
    pub(crate) fn reject_all(&mut self, error: FetchError) -> usize {
        self.dispatch.reject_all(error.clone()) + self.incoming.reject_all(error)
    }
}

/// Future returned by [`AccumulatedFetching::submit`](crate::AccumulatedFetching::submit).
///
/// The request is already queued by the time this value exists; polling only
/// waits for the outcome.
#[must_use = "the response is lost if the pending response is dropped"]
pub struct PendingResponse<Resp> {
    inner: PendingInner<Resp>,
}

enum PendingInner<Resp> {
    Rejected(Option<FetchError>),
    Waiting(oneshot::Receiver<Result<Resp, FetchError>>),
}

impl<Resp> PendingResponse<Resp> {
    pub(crate) fn rejected(error: FetchError) -> Self {
        Self { inner: PendingInner::Rejected(Some(error)) }
    }
}

impl<Resp> Future for PendingResponse<Resp> {
    type Output = Result<Resp, FetchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            PendingInner::Rejected(error) => {
                Poll::Ready(Err(error.take().unwrap_or(FetchError::Cancelled)))
            }
            // A slot dropped without being written means the engine went away.
            PendingInner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(FetchError::Cancelled))),
        }
    }
}
