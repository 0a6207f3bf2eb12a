// Tests for the batching engine, driven through a transport whose batches
// are released one by one by the test.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use crate::*;

    /// How the gated transport answers one batch
    enum Reply {
        Echo,
        Fail(TransportError),
        Count(usize),
        Panic,
    }

    struct Call {
        requests: Vec<String>,
        reply: oneshot::Sender<Reply>,
    }

    impl Call {
        fn answer(self, reply: Reply) {
            let _ = self.reply.send(reply);
        }
    }

    struct GatedTransport {
        calls: mpsc::UnboundedSender<Call>,
        honor_cancel: bool,
        in_flight: AtomicBool,
        overlaps: AtomicUsize,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        type Request = String;
        type Response = String;

        async fn send_batch(
            &self,
            requests: &[String],
            cancel: &CancellationToken,
        ) -> Result<Vec<String>, TransportError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }

            let (tx, rx) = oneshot::channel();
            let _ = self.calls.send(Call { requests: requests.to_vec(), reply: tx });

            let reply = tokio::select! {
                reply = rx => reply.unwrap_or(Reply::Fail(TransportError::unknown("gate dropped"))),
                _ = cancel.cancelled(), if self.honor_cancel => {
                    self.in_flight.store(false, Ordering::SeqCst);
                    return Err(TransportError::Cancelled);
                }
            };
            self.in_flight.store(false, Ordering::SeqCst);

            match reply {
                Reply::Echo => Ok(requests.iter().map(|r| format!("resp:{r}")).collect()),
                Reply::Fail(err) => Err(err),
                Reply::Count(n) => Ok((0..n).map(|i| format!("resp:{i}")).collect()),
                Reply::Panic => panic!("transport exploded"),
            }
        }
    }

    struct Harness {
        engine: AccumulatedFetching<Arc<GatedTransport>>,
        transport: Arc<GatedTransport>,
        calls: mpsc::UnboundedReceiver<Call>,
        errors: Arc<Mutex<Vec<DispatchError>>>,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            Self::build(config, true, CancellationToken::new())
        }

        fn build(config: EngineConfig, honor_cancel: bool, cancel: CancellationToken) -> Self {
            let (tx, calls) = mpsc::unbounded_channel();
            let transport = Arc::new(GatedTransport {
                calls: tx,
                honor_cancel,
                in_flight: AtomicBool::new(false),
                overlaps: AtomicUsize::new(0),
            });
            let errors = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&errors);
            let engine = AccumulatedFetching::with_cancellation(
                Arc::clone(&transport),
                move |err: &DispatchError| sink.lock().unwrap().push(err.clone()),
                config,
                cancel,
            );
            Self { engine, transport, calls, errors }
        }

        async fn next_call(&mut self) -> Call {
            timeout(Duration::from_secs(5), self.calls.recv())
                .await
                .expect("no batch was dispatched")
                .expect("transport channel closed")
        }

        fn no_call_pending(&mut self) -> bool {
            self.calls.try_recv().is_err()
        }

        fn errors(&self) -> Vec<DispatchError> {
            self.errors.lock().unwrap().clone()
        }
    }

    async fn still_pending(pending: &mut PendingResponse<String>) -> bool {
        timeout(Duration::from_millis(20), pending).await.is_err()
    }

    #[tokio::test]
    async fn test_single_request() {
        let mut h = Harness::new(EngineConfig::default());
        assert_eq!(h.engine.state(), EngineState::Waiting);

        let pending = h.engine.submit("a".to_string());
        let call = h.next_call().await;
        assert_eq!(call.requests, ["a"]);
        assert_eq!(h.engine.state(), EngineState::Dispatching);

        call.answer(Reply::Echo);
        assert_eq!(pending.await.unwrap(), "resp:a");

        h.engine.wait_for_state(EngineState::Waiting).await;
        assert!(h.errors().is_empty());
    }

    #[tokio::test]
    async fn test_responses_follow_request_order() {
        let mut h = Harness::new(EngineConfig::default());

        let pending: Vec<_> = (0..5).map(|i| h.engine.submit(format!("req{i}"))).collect();

        let call = h.next_call().await;
        assert_eq!(call.requests, ["req0", "req1", "req2", "req3", "req4"]);
        call.answer(Reply::Echo);

        for (i, p) in pending.into_iter().enumerate() {
            assert_eq!(p.await.unwrap(), format!("resp:req{i}"));
        }
        assert_eq!(h.engine.metrics().batches_dispatched, 1);
        assert_eq!(h.engine.metrics().requests_completed, 5);
    }

    #[tokio::test]
    async fn test_request_during_flight_goes_in_next_batch() {
        let mut h = Harness::new(EngineConfig::default());

        let a = h.engine.submit("A".to_string());
        let first = h.next_call().await;
        assert_eq!(h.engine.state(), EngineState::Dispatching);

        let mut b = h.engine.submit("B".to_string());
        assert_eq!(h.engine.queued(), 1);

        first.answer(Reply::Echo);
        assert_eq!(a.await.unwrap(), "resp:A");

        let second = h.next_call().await;
        assert_eq!(second.requests, ["B"]);
        assert!(still_pending(&mut b).await);

        second.answer(Reply::Echo);
        assert_eq!(b.await.unwrap(), "resp:B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let mut h = Harness::new(EngineConfig::default());

        let mut pending = vec![h.engine.submit("r0".to_string())];
        for round in 1..4 {
            let call = h.next_call().await;
            for i in 0..round {
                pending.push(h.engine.submit(format!("r{round}-{i}")));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(h.no_call_pending(), "second batch sent while one was in flight");
            call.answer(Reply::Echo);
        }
        h.next_call().await.answer(Reply::Echo);

        for p in pending {
            assert!(p.await.is_ok());
        }
        assert_eq!(h.transport.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(h.engine.metrics().batches_dispatched, 4);
        assert_eq!(h.engine.metrics().max_batch_size, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_dispatch() {
        let mut h = Harness::new(EngineConfig::paused());
        assert!(h.engine.is_interrupted());

        let pending: Vec<_> = (0..3).map(|i| h.engine.submit(format!("p{i}"))).collect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(h.no_call_pending());
        assert_eq!(h.engine.state(), EngineState::Waiting);
        assert_eq!(h.engine.queued(), 3);

        h.engine.set_interrupted(false).unwrap();
        let call = h.next_call().await;
        assert_eq!(call.requests, ["p0", "p1", "p2"]);
        call.answer(Reply::Echo);

        for p in pending {
            assert!(p.await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_does_not_stop_batch_in_flight() {
        let mut h = Harness::new(EngineConfig::default());

        let a = h.engine.submit("a".to_string());
        let call = h.next_call().await;

        h.engine.set_interrupted(true).unwrap();
        let mut b = h.engine.submit("b".to_string());
        call.answer(Reply::Echo);
        assert_eq!(a.await.unwrap(), "resp:a");

        h.engine.wait_for_state(EngineState::Waiting).await;
        assert!(still_pending(&mut b).await);
        assert!(h.no_call_pending());

        h.engine.set_interrupted(false).unwrap();
        h.next_call().await.answer(Reply::Echo);
        assert_eq!(b.await.unwrap(), "resp:b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_keeps_batch_and_pauses() {
        let mut h = Harness::new(EngineConfig::default());

        let mut a = h.engine.submit("a".to_string());
        let mut b = h.engine.submit("b".to_string());
        let call = h.next_call().await;
        call.answer(Reply::Fail(TransportError::server("session expired")));

        h.engine.wait_for_state(EngineState::Waiting).await;
        assert!(h.engine.is_interrupted());
        assert_eq!(
            h.errors(),
            [DispatchError::Transport(TransportError::server("session expired"))]
        );
        assert!(still_pending(&mut a).await);
        assert!(still_pending(&mut b).await);

        // Arrives while paused; must not be folded into the retried batch.
        let c = h.engine.submit("c".to_string());
        assert_eq!(h.engine.queued(), 3);

        h.engine.set_interrupted(false).unwrap();
        let retry = h.next_call().await;
        assert_eq!(retry.requests, ["a", "b"]);
        retry.answer(Reply::Echo);
        assert_eq!(a.await.unwrap(), "resp:a");
        assert_eq!(b.await.unwrap(), "resp:b");

        let next = h.next_call().await;
        assert_eq!(next.requests, ["c"]);
        next.answer(Reply::Echo);
        assert_eq!(c.await.unwrap(), "resp:c");

        assert_eq!(h.errors().len(), 1);
        assert_eq!(h.engine.metrics().batches_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_panic_is_reported() {
        let mut h = Harness::new(EngineConfig::default());

        let mut a = h.engine.submit("a".to_string());
        h.next_call().await.answer(Reply::Panic);

        h.engine.wait_for_state(EngineState::Waiting).await;
        assert_eq!(h.errors(), [DispatchError::Panicked("transport exploded".to_string())]);
        assert!(h.engine.is_interrupted());
        assert!(still_pending(&mut a).await);

        h.engine.set_interrupted(false).unwrap();
        h.next_call().await.answer(Reply::Echo);
        assert_eq!(a.await.unwrap(), "resp:a");
    }

    #[tokio::test]
    async fn test_close_rejects_queued_requests() {
        let mut h = Harness::new(EngineConfig::paused());

        let pending: Vec<_> = (0..3).map(|i| h.engine.submit(format!("q{i}"))).collect();
        h.engine.close();
        assert!(h.engine.is_closing());

        for p in pending {
            assert_eq!(p.await, Err(FetchError::Cancelled));
        }

        h.engine.closed().await;
        assert_eq!(h.engine.state(), EngineState::Closed);
        assert!(h.no_call_pending());
        assert!(h.errors().is_empty());

        assert_eq!(h.engine.submit("late".to_string()).await, Err(FetchError::Cancelled));
        assert_eq!(h.engine.set_interrupted(false), Err(FetchError::Cancelled));

        let metrics = h.engine.metrics();
        assert_eq!(metrics.requests_cancelled, 3);
        assert_eq!(metrics.requests_rejected, 1);

        // Idempotent
        h.engine.close();
        assert_eq!(h.engine.state(), EngineState::Closed);
    }

    #[tokio::test]
    async fn test_close_lets_batch_in_flight_deliver() {
        let mut h = Harness::build(EngineConfig::default(), false, CancellationToken::new());

        let a = h.engine.submit("a".to_string());
        let call = h.next_call().await;
        let b = h.engine.submit("b".to_string());

        h.engine.close();
        assert_eq!(b.await, Err(FetchError::Cancelled));
        assert_eq!(h.engine.state(), EngineState::Dispatching);

        call.answer(Reply::Echo);
        assert_eq!(a.await.unwrap(), "resp:a");

        h.engine.closed().await;
        assert!(h.errors().is_empty());
    }

    #[tokio::test]
    async fn test_close_cancels_batch_in_flight_silently() {
        let mut h = Harness::new(EngineConfig::default());

        let a = h.engine.submit("a".to_string());
        let _call = h.next_call().await;

        h.engine.close();
        assert_eq!(a.await, Err(FetchError::Cancelled));

        h.engine.closed().await;
        assert!(h.errors().is_empty(), "shutdown cancellation must not be reported");
    }

    #[tokio::test]
    async fn test_response_count_mismatch_is_fatal() {
        let mut h = Harness::new(EngineConfig::default());

        let a = h.engine.submit("a".to_string());
        let b = h.engine.submit("b".to_string());
        let call = h.next_call().await;
        let c = h.engine.submit("c".to_string());
        call.answer(Reply::Count(1));

        let violation = FetchError::ProtocolViolation { expected: 2, actual: 1 };
        assert_eq!(a.await, Err(violation.clone()));
        assert_eq!(b.await, Err(violation.clone()));
        assert_eq!(c.await, Err(violation));

        h.engine.closed().await;
        assert!(h.engine.is_closing());
        assert_eq!(h.errors(), [DispatchError::ProtocolViolation { expected: 2, actual: 1 }]);
        assert!(h.errors()[0].is_fatal());
    }

    #[tokio::test]
    async fn test_external_cancellation_closes_engine() {
        let token = CancellationToken::new();
        let h = Harness::build(EngineConfig::paused(), true, token.clone());

        let pending = h.engine.submit("x".to_string());
        token.cancel();

        assert_eq!(pending.await, Err(FetchError::Cancelled));
        h.engine.closed().await;
        assert!(h.engine.is_closing());
        assert!(h.engine.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_caller_abort_leaves_engine_running() {
        let mut h = Harness::new(EngineConfig::default());

        let abort = CancellationToken::new();
        let aborted = h.engine.submit_cancellable("a".to_string(), abort.clone());
        let kept = h.engine.submit("b".to_string());
        let call = h.next_call().await;
        assert_eq!(call.requests, ["a", "b"]);

        abort.cancel();
        assert_eq!(aborted.await, Err(FetchError::Aborted));

        call.answer(Reply::Echo);
        assert_eq!(kept.await.unwrap(), "resp:b");
        assert_eq!(h.engine.metrics().requests_completed, 1);
        assert!(!h.engine.is_closing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_with_empty_queues_does_not_dispatch() {
        let mut h = Harness::new(EngineConfig::paused());

        h.engine.set_interrupted(false).unwrap();
        h.engine.set_interrupted(true).unwrap();
        h.engine.set_interrupted(false).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(h.no_call_pending());
        assert_eq!(h.engine.state(), EngineState::Waiting);
        assert!(!h.engine.is_interrupted());
    }

    #[tokio::test]
    async fn test_drop_closes_engine() {
        let h = Harness::new(EngineConfig::paused());
        let pending = h.engine.submit("x".to_string());
        let token = h.engine.cancellation_token();

        drop(h);
        assert!(token.is_cancelled());
        assert_eq!(pending.await, Err(FetchError::Cancelled));
    }
}
