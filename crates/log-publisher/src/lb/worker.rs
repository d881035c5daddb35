// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One worker per endpoint.
//!
//! ```text
//!        ┌──────────────┐ connected ┌──────────────┐
//!  ────▶ │  Connecting  │ ────────▶ │   Sending    │
//!        └──────────────┘           └──────────────┘
//!          ▲   │ fail: backoff         │    │ dispatch ok: spawn completion
//!          │   └──────┘                │    └──▶ next message
//!          └───────── dispatch error: close, backoff
//! ```
//!
//! A dispatch only hands the events to the connection. The outcome is read
//! from the acknowledgement by a completion task so the worker can pipeline
//! the next message straight away.

use crate::backoff::Backoff;
use crate::client::{AsyncClient, BulkAck, BulkResult, EventAck};
use crate::errors::ClientError;
use crate::lb::context::DistributionContext;
use crate::lb::message::{Message, Payload};
use crate::observer::PipelineEvent;
use std::sync::Arc;
use tracing::debug;

enum Ack {
    Event(EventAck),
    Bulk(BulkAck),
}

pub(crate) struct Worker {
    id: usize,
    client: Box<dyn AsyncClient>,
    backoff: Backoff,
    ctx: Arc<DistributionContext>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        client: Box<dyn AsyncClient>,
        ctx: Arc<DistributionContext>,
        backoff: Backoff,
    ) -> Self {
        Self {
            id,
            client,
            backoff,
            ctx,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(worker = self.id, "LB | Worker started");

        loop {
            if self.connect().await {
                break;
            }
            let done = self.send_loop().await;
            self.close_connection().await;
            if done {
                break;
            }
        }

        self.close_connection().await;
        debug!(worker = self.id, "LB | Worker stopped");
    }

    /// Connects with backoff. Returns `true` if the pool was cancelled.
    async fn connect(&mut self) -> bool {
        loop {
            let cancel = self.ctx.cancel.clone();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return true,
                result = self.client.connect(self.ctx.timeout) => result,
            };

            match &result {
                Ok(()) => self.ctx.observe(PipelineEvent::Connected { worker: self.id }),
                Err(err) => self.ctx.observe(PipelineEvent::ConnectFailed {
                    worker: self.id,
                    error: err.to_string(),
                    retry_in: self.backoff.current(),
                }),
            }

            if self.backoff.wait_on_error(result.as_ref().err()).await {
                return true;
            }
            if result.is_ok() {
                return false;
            }
        }
    }

    /// Dispatches messages until a dispatch fails (`false`) or the pool is
    /// cancelled (`true`).
    async fn send_loop(&mut self) -> bool {
        loop {
            let Some(mut msg) = self.ctx.receive().await else {
                return true;
            };
            msg.worker = Some(self.id);

            let result = self.dispatch(msg).await;
            if self.backoff.wait_on_error(result.as_ref().err()).await {
                return true;
            }
            if result.is_err() {
                return false;
            }
        }
    }

    async fn dispatch(&mut self, mut msg: Message) -> Result<(), ClientError> {
        let cancel = self.ctx.cancel.clone();
        let payload = &msg.payload;
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            sent = async {
                match payload {
                    Payload::Event(event) => self.client.publish_event(event).await.map(Ack::Event),
                    Payload::Batch(events) => self.client.publish_events(events).await.map(Ack::Bulk),
                }
            } => Some(sent),
        };

        match sent {
            None => {
                msg.cancel();
                Ok(())
            }
            Some(Ok(Ack::Event(ack))) => {
                self.ctx
                    .tasks
                    .spawn(handle_event_ack(self.ctx.clone(), msg, ack));
                Ok(())
            }
            Some(Ok(Ack::Bulk(ack))) => {
                self.ctx
                    .tasks
                    .spawn(handle_bulk_ack(self.ctx.clone(), msg, ack));
                Ok(())
            }
            Some(Err(err)) => {
                // Nothing reached the endpoint; send it again elsewhere.
                msg.decrement();
                self.ctx.observe(PipelineEvent::PublishFailed {
                    worker: msg.worker,
                    events: msg.len(),
                    attempts_left: msg.attempts_left,
                    error: err.to_string(),
                });
                self.ctx.retry(msg);
                Err(err)
            }
        }
    }

    async fn close_connection(&mut self) {
        if !self.client.is_connected() {
            return;
        }
        if let Err(err) = self.client.close().await {
            debug!(worker = self.id, %err, "LB | Error closing connection");
        }
    }
}

async fn handle_event_ack(ctx: Arc<DistributionContext>, mut msg: Message, ack: EventAck) {
    let result = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => {
            msg.cancel();
            return;
        }
        result = ack => result.unwrap_or(Err(ClientError::AckDropped)),
    };

    match result {
        Ok(()) => ctx.complete(msg),
        Err(err) => {
            msg.decrement();
            ctx.observe(PipelineEvent::PublishFailed {
                worker: msg.worker,
                events: 1,
                attempts_left: msg.attempts_left,
                error: err.to_string(),
            });
            ctx.retry(msg);
        }
    }
}

async fn handle_bulk_ack(ctx: Arc<DistributionContext>, msg: Message, ack: BulkAck) {
    let received = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => None,
        received = ack => Some(received),
    };

    let result = match received {
        None => {
            msg.cancel();
            return;
        }
        Some(Ok(result)) => result,
        Some(Err(_dropped)) => BulkResult::failed(msg.events(), Some(ClientError::AckDropped)),
    };
    handle_bulk_result(&ctx, msg, result);
}

/// Applies a bulk outcome to its message.
///
/// Partial progress refills a bounded budget. Only transient bulk failures
/// can exhaust it; any other error always sends the remaining events again.
fn handle_bulk_result(ctx: &DistributionContext, mut msg: Message, result: BulkResult) {
    let BulkResult { failed, error } = result;
    let total = msg.len();
    if failed.is_empty() {
        ctx.complete(msg);
        return;
    }
    ctx.record_published(total.saturating_sub(failed.len()));

    match error {
        Some(err) => {
            msg.decrement();
            if failed.len() < total {
                msg.reset_attempts(ctx.max_attempts);
            }
            msg.retain_failed(failed);

            if err.is_temp_bulk_failure() && msg.exhausted() {
                ctx.drop_message(msg, &err);
                return;
            }

            ctx.observe(PipelineEvent::PublishFailed {
                worker: msg.worker,
                events: msg.len(),
                attempts_left: msg.attempts_left,
                error: err.to_string(),
            });
            ctx.retry(msg);
        }
        None => {
            msg.retain_failed(failed);
            ctx.observe(PipelineEvent::Requeued {
                worker: msg.worker,
                events: msg.len(),
            });
            ctx.retry(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::{Batch, Event};
    use crate::observer::TracingObserver;
    use crate::signal::{sync_signal, Outcome};
    use std::sync::atomic::Ordering;

    fn ctx(max_attempts: u32) -> (Arc<DistributionContext>, crate::lb::context::Distributor) {
        let config = Config {
            max_attempts,
            ..Default::default()
        };
        DistributionContext::new(&config, 1, Arc::new(TracingObserver))
    }

    fn events(n: u64) -> Batch {
        (0..n).map(|i| Event::new("app.log", i, format!("line {i}"))).collect()
    }

    fn bounded(n: u64, attempts: u32) -> (Message, tokio::sync::oneshot::Receiver<Outcome>) {
        let (signal, outcome) = sync_signal();
        let mut msg = Message::batch(events(n), Some(signal));
        msg.attempts_left = Some(attempts);
        (msg, outcome)
    }

    #[tokio::test]
    async fn test_success_completes_message() {
        let (ctx, _distributor) = ctx(3);
        let (msg, outcome) = bounded(3, 3);

        handle_bulk_result(&ctx, msg, BulkResult::ok());

        assert_eq!(outcome.await.expect("outcome"), Outcome::Completed);
        assert_eq!(ctx.counters.published.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_temp_failure_on_last_attempt_drops() {
        let (ctx, _distributor) = ctx(3);
        let (msg, outcome) = bounded(3, 1);

        handle_bulk_result(
            &ctx,
            msg,
            BulkResult::failed(events(3), Some(ClientError::TempBulkFailure)),
        );

        assert_eq!(ctx.retry_depth(), 0);
        assert_eq!(ctx.counters.dropped.load(Ordering::Relaxed), 3);
        assert!(outcome.await.is_err());
    }

    #[tokio::test]
    async fn test_temp_failure_with_attempts_left_retries() {
        let (ctx, _distributor) = ctx(3);
        let (msg, _outcome) = bounded(3, 3);

        handle_bulk_result(
            &ctx,
            msg,
            BulkResult::failed(events(3), Some(ClientError::TempBulkFailure)),
        );

        assert_eq!(ctx.retry_depth(), 1);
        assert_eq!(ctx.counters.dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_partial_progress_refills_budget() {
        let (ctx, _distributor) = ctx(3);
        let (msg, _outcome) = bounded(3, 1);

        // Would exhaust the budget, but one event got through.
        handle_bulk_result(
            &ctx,
            msg,
            BulkResult::failed(events(2), Some(ClientError::TempBulkFailure)),
        );

        assert_eq!(ctx.retry_depth(), 1);
        assert_eq!(ctx.counters.published.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.counters.dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_other_errors_always_retry() {
        let (ctx, _distributor) = ctx(3);
        let (msg, _outcome) = bounded(3, 1);

        handle_bulk_result(
            &ctx,
            msg,
            BulkResult::failed(events(3), Some(ClientError::Connection("reset".into()))),
        );

        assert_eq!(ctx.retry_depth(), 1);
        assert_eq!(ctx.counters.dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_partial_success_without_error_requeues_remaining() {
        let (ctx, _distributor) = ctx(3);
        let (msg, _outcome) = bounded(5, 2);

        handle_bulk_result(&ctx, msg, BulkResult::failed(events(2), None));

        assert_eq!(ctx.retry_depth(), 1);
        assert_eq!(ctx.counters.published.load(Ordering::Relaxed), 3);
        assert_eq!(ctx.counters.retried.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_error_with_nothing_failed_completes() {
        let (ctx, _distributor) = ctx(3);
        let (msg, outcome) = bounded(2, 3);

        handle_bulk_result(
            &ctx,
            msg,
            BulkResult::failed(Vec::new(), Some(ClientError::TempBulkFailure)),
        );

        assert_eq!(outcome.await.expect("outcome"), Outcome::Completed);
    }

    #[tokio::test]
    async fn test_dropped_ack_retries_whole_batch() {
        let (ctx, _distributor) = ctx(3);
        let (msg, _outcome) = bounded(4, 3);
        let (tx, rx) = tokio::sync::oneshot::channel::<BulkResult>();
        drop(tx);

        handle_bulk_ack(ctx.clone(), msg, rx).await;

        assert_eq!(ctx.retry_depth(), 1);
        assert_eq!(ctx.counters.retried.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_pending_ack_is_canceled_on_shutdown() {
        let (ctx, _distributor) = ctx(3);
        let (msg, outcome) = bounded(2, 3);
        let (_tx, rx) = tokio::sync::oneshot::channel::<BulkResult>();

        ctx.cancel.cancel();
        handle_bulk_ack(ctx.clone(), msg, rx).await;

        assert_eq!(outcome.await.expect("outcome"), Outcome::Canceled);
    }

    #[tokio::test]
    async fn test_failed_single_event_is_always_retried() {
        let (ctx, _distributor) = ctx(3);
        let (signal, mut outcome) = sync_signal();
        let mut msg = Message::event(Event::new("a", 0, "x"), Some(signal));
        msg.attempts_left = Some(1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        tx.send(Err(ClientError::Publish("rejected".into())))
            .expect("send ack");

        handle_event_ack(ctx.clone(), msg, rx).await;

        assert_eq!(ctx.retry_depth(), 1);
        assert_eq!(ctx.counters.dropped.load(Ordering::Relaxed), 0);
        assert!(matches!(
            outcome.try_recv(),
            Err(tokio::sync::oneshot::error::TryRecvError::Empty)
        ));
    }
}
