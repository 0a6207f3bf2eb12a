//! The dispatch loop: one task per engine, one batch in flight at a time.

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::queue::CallQueue;
use super::{EngineState, Shared};
use crate::error::{DispatchError, FetchError, TransportError};
use crate::transport::Transport;

type Batch<T> = CallQueue<<T as Transport>::Request, <T as Transport>::Response>;

enum Step<T: Transport> {
    Shutdown,
    Wait(oneshot::Receiver<()>),
    Dispatch(Batch<T>),
}

pub(crate) async fn run<T: Transport>(shared: Arc<Shared<T>>) {
    debug!(engine = %shared.name, "Dispatch loop started");

    loop {
        match next_step(&shared) {
            Step::Shutdown => break,
            Step::Wait(woken) => {
                tokio::select! {
                    _ = woken => {}
                    _ = shared.cancel.cancelled() => {}
                }
                revalidate_after_wake(&shared);
            }
            Step::Dispatch(batch) => {
                if dispatch(&shared, batch).await.is_break() {
                    break;
                }
            }
        }
    }

    shutdown(&shared);
}

/// Decide what to do next under the lock: stop, suspend, or take the next
/// batch.
fn next_step<T: Transport>(shared: &Shared<T>) -> Step<T> {
    let mut inner = shared.lock();

    if shared.is_closing() {
        return Step::Shutdown;
    }

    if inner.must_wait(false) {
        let (waker, woken) = oneshot::channel();
        inner.waker = Some(waker);
        shared.set_state(EngineState::Waiting);
        return Step::Wait(woken);
    }

    inner.queues.swap_if_dispatch_empty();
    let batch = inner.queues.take_dispatch();
    assert!(!batch.is_empty(), "dispatch loop took an empty batch");

    shared.set_state(EngineState::Dispatching);
    Step::Dispatch(batch)
}

/// Wakes only happen when the wait predicate turned false, and only the loop
/// removes queued calls (close is caught by the closing check), so empty
/// queues here mean the queue bookkeeping is broken.
fn revalidate_after_wake<T: Transport>(shared: &Shared<T>) {
    let mut inner = shared.lock();
    inner.waker = None;

    if shared.is_closing() {
        return;
    }

    assert!(!inner.queues.is_empty(), "dispatch loop woken with both queues empty");

    if inner.interrupted {
        debug!(engine = %shared.name, "Interrupted again before dispatch, back to waiting");
    }
}

async fn dispatch<T: Transport>(shared: &Shared<T>, batch: Batch<T>) -> ControlFlow<()> {
    let batch_size = batch.len();
    shared.metrics.record_batch(batch_size);
    debug!(engine = %shared.name, batch_size, "Dispatching batch");

    let sent = AssertUnwindSafe(shared.transport.send_batch(batch.requests(), &shared.cancel))
        .catch_unwind()
        .await;

    let error = match sent {
        Ok(Ok(responses)) if responses.len() != batch_size => {
            fail_protocol(shared, batch, responses.len());
            return ControlFlow::Break(());
        }
        Ok(Ok(responses)) => {
            deliver(shared, batch, responses);
            return ControlFlow::Continue(());
        }
        Ok(Err(TransportError::Cancelled)) if shared.is_closing() => {
            debug!(engine = %shared.name, batch_size, "Batch cancelled by shutdown");
            retain(shared, batch, false);
            return ControlFlow::Continue(());
        }
        Ok(Err(TransportError::Cancelled)) => DispatchError::Cancelled,
        Ok(Err(err)) => DispatchError::Transport(err),
        Err(panic) => DispatchError::Panicked(panic_message(panic.as_ref())),
    };

    shared.metrics.record_failed_batch();
    warn!(
        engine = %shared.name,
        batch_size,
        error = %error,
        "Batch failed, engine interrupted until resumed"
    );
    retain(shared, batch, true);
    report(shared, &error);
    ControlFlow::Continue(())
}

/// Settle each call with its positional response. The emptied buffer goes
/// back into the dispatch position so the next swap reuses it.
fn deliver<T: Transport>(shared: &Shared<T>, mut batch: Batch<T>, responses: Vec<T::Response>) {
    let batch_size = batch.len();
    let delivered = batch.resolve_all(responses);
    shared.metrics.record_completed(delivered);
    debug!(engine = %shared.name, batch_size, delivered, "Batch delivered");

    shared.lock().queues.restore_dispatch(batch);
}

/// Keep a failed batch queued for the next attempt.
fn retain<T: Transport>(shared: &Shared<T>, batch: Batch<T>, interrupt: bool) {
    let mut inner = shared.lock();
    inner.queues.restore_dispatch(batch);
    if interrupt {
        inner.interrupted = true;
    }
}

/// Response count mismatch. Nothing about the transport can be trusted
/// after this: every pending call is rejected and the engine closes.
fn fail_protocol<T: Transport>(shared: &Shared<T>, mut batch: Batch<T>, actual: usize) {
    let expected = batch.len();
    error!(
        engine = %shared.name,
        expected,
        actual,
        "Protocol violation: response count does not match batch size, closing engine"
    );

    shared.cancel.cancel();
    let violation = FetchError::ProtocolViolation { expected, actual };
    batch.reject_all(violation.clone());
    shared.lock().queues.reject_all(violation);

    shared.metrics.record_failed_batch();
    report(shared, &DispatchError::ProtocolViolation { expected, actual });
}

fn report<T: Transport>(shared: &Shared<T>, error: &DispatchError) {
    let reported = std::panic::catch_unwind(AssertUnwindSafe(|| shared.handler.fetch_error(error)));
    if reported.is_err() {
        error!(engine = %shared.name, "Error handler panicked");
    }
}

fn shutdown<T: Transport>(shared: &Shared<T>) {
    let mut inner = shared.lock();
    inner.waker = None;

    let cancelled = inner.queues.reject_all(FetchError::Cancelled);
    if cancelled > 0 {
        shared.metrics.record_cancelled(cancelled);
    }

    shared.set_state(EngineState::Closed);
    info!(engine = %shared.name, cancelled, "Dispatch loop closed");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
