// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared state of the worker pool and the distributor actor.
//!
//! ```text
//!  publishers ──push──▶ messages (bounded) ──┐
//!                                            ├──▶ Distributor ──reply──▶ idle Worker
//!  completions ─retry─▶ retries (unbounded) ─┘        ▲
//!                                                     │
//!  Worker ──────────── request (oneshot reply slot) ──┘
//! ```
//!
//! The distributor owns both receivers. A worker asks for work by sending a
//! oneshot sender; the distributor answers it with the oldest retry if there
//! is one, otherwise with the next fresh message. Every message in the retry
//! channel was already accepted by the pool, so its depth stays bounded by
//! the number of in-flight messages and pushing a retry never blocks.

use crate::config::Config;
use crate::lb::message::Message;
use crate::observer::{Observer, PipelineEvent};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

pub(crate) type WorkRequest = oneshot::Sender<Message>;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) published: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

pub(crate) struct DistributionContext {
    requests: mpsc::Sender<WorkRequest>,
    messages: mpsc::Sender<Message>,
    retries: mpsc::UnboundedSender<Message>,
    retry_depth: Arc<AtomicUsize>,
    retry_backlog_warn: usize,
    pub(crate) cancel: CancellationToken,
    /// Workers, the distributor and completion handlers.
    pub(crate) tasks: TaskTracker,
    pub(crate) timeout: Duration,
    /// 0 means unlimited.
    pub(crate) max_attempts: u32,
    observer: Arc<dyn Observer>,
    pub(crate) counters: Counters,
}

pub(crate) struct Distributor {
    requests: mpsc::Receiver<WorkRequest>,
    messages: mpsc::Receiver<Message>,
    retries: mpsc::UnboundedReceiver<Message>,
    retry_depth: Arc<AtomicUsize>,
    /// Message whose requesting worker went away before taking it.
    held: Option<Message>,
    cancel: CancellationToken,
}

impl DistributionContext {
    pub(crate) fn new(
        config: &Config,
        workers: usize,
        observer: Arc<dyn Observer>,
    ) -> (Arc<Self>, Distributor) {
        let (requests_tx, requests_rx) = mpsc::channel(workers.max(1));
        let (messages_tx, messages_rx) = mpsc::channel(config.queue_size.max(1));
        let (retries_tx, retries_rx) = mpsc::unbounded_channel();
        let retry_depth = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let ctx = Arc::new(Self {
            requests: requests_tx,
            messages: messages_tx,
            retries: retries_tx,
            retry_depth: retry_depth.clone(),
            retry_backlog_warn: config.retry_backlog_warn,
            cancel: cancel.clone(),
            tasks: TaskTracker::new(),
            timeout: config.timeout,
            max_attempts: config.max_attempts,
            observer,
            counters: Counters::default(),
        });

        let distributor = Distributor {
            requests: requests_rx,
            messages: messages_rx,
            retries: retries_rx,
            retry_depth,
            held: None,
            cancel,
        };

        (ctx, distributor)
    }

    pub(crate) fn observe(&self, event: PipelineEvent) {
        self.observer.observe(&event);
    }

    pub(crate) fn retry_depth(&self) -> usize {
        self.retry_depth.load(Ordering::Relaxed)
    }

    /// Waits for the next message to dispatch. Returns `None` once the pool
    /// is cancelled.
    pub(crate) async fn receive(&self) -> Option<Message> {
        let (reply_tx, mut reply_rx) = oneshot::channel();

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            sent = self.requests.send(reply_tx) => {
                if sent.is_err() {
                    return None;
                }
            }
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                // A message handed over concurrently is ours to cancel.
                reply_rx.close();
                if let Ok(msg) = reply_rx.try_recv() {
                    msg.cancel();
                }
                None
            }
            msg = &mut reply_rx => msg.ok(),
        }
    }

    /// Enters a new message into the pool. Returns `false` if it was not
    /// accepted, in which case its signal has been resolved or released.
    pub(crate) async fn push(&self, mut msg: Message, guaranteed: bool) -> bool {
        msg.attempts_left = if guaranteed || self.max_attempts == 0 {
            None
        } else {
            Some(self.max_attempts)
        };

        if msg.attempts_left.is_some() {
            return self.forward_bounded(msg).await;
        }

        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = self.messages.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => {
                permit.send(msg);
                true
            }
            None => {
                msg.cancel();
                false
            }
        }
    }

    /// Each `timeout` spent waiting for queue capacity costs one attempt.
    async fn forward_bounded(&self, mut msg: Message) -> bool {
        while !msg.exhausted() {
            let reserved = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    msg.cancel();
                    return false;
                }
                reserved = tokio::time::timeout(self.timeout, self.messages.reserve()) => reserved,
            };

            match reserved {
                Ok(Ok(permit)) => {
                    permit.send(msg);
                    return true;
                }
                Ok(Err(_closed)) => {
                    msg.cancel();
                    return false;
                }
                Err(_elapsed) => msg.decrement(),
            }
        }

        self.drop_message(msg, "timed out waiting for queue capacity");
        false
    }

    /// Sends a message back for another attempt, regardless of its budget.
    pub(crate) fn retry(&self, msg: Message) {
        if self.cancel.is_cancelled() {
            msg.cancel();
            return;
        }

        let events = msg.len() as u64;
        let depth = self.retry_depth.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(mpsc::error::SendError(msg)) = self.retries.send(msg) {
            self.retry_depth.fetch_sub(1, Ordering::Relaxed);
            msg.cancel();
            return;
        }
        self.counters.retried.fetch_add(events, Ordering::Relaxed);

        let warn_at = self.retry_backlog_warn;
        if warn_at > 0 && depth >= warn_at && depth % warn_at == 0 {
            self.observe(PipelineEvent::RetryBacklog { depth });
        }
    }

    /// Gives up on a message. Its signal is released without being invoked.
    pub(crate) fn drop_message(&self, msg: Message, reason: impl std::fmt::Display) {
        let events = msg.len();
        self.counters
            .dropped
            .fetch_add(events as u64, Ordering::Relaxed);
        self.observe(PipelineEvent::Dropped {
            events,
            reason: reason.to_string(),
        });
    }

    pub(crate) fn record_published(&self, events: usize) {
        self.counters
            .published
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn complete(&self, msg: Message) {
        self.record_published(msg.len());
        msg.complete();
    }
}

impl Distributor {
    pub(crate) async fn run(mut self) {
        debug!("LB | Distributor started");

        loop {
            let reply = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(reply) => reply,
                    None => break,
                },
            };

            let msg = match self.held.take() {
                Some(msg) => msg,
                None => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    Some(msg) = self.retries.recv() => {
                        self.retry_depth.fetch_sub(1, Ordering::Relaxed);
                        msg
                    }
                    Some(msg) = self.messages.recv() => msg,
                    else => break,
                },
            };

            if let Err(msg) = reply.send(msg) {
                self.held = Some(msg);
            }
        }

        self.drain();
        debug!("LB | Distributor stopped");
    }

    /// Cancels everything still queued.
    fn drain(&mut self) {
        self.messages.close();
        self.retries.close();

        if let Some(msg) = self.held.take() {
            msg.cancel();
        }
        while let Ok(msg) = self.retries.try_recv() {
            self.retry_depth.fetch_sub(1, Ordering::Relaxed);
            msg.cancel();
        }
        while let Ok(msg) = self.messages.try_recv() {
            msg.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::observer::TracingObserver;
    use crate::signal::{sync_signal, Outcome};

    fn setup(config: &Config) -> (Arc<DistributionContext>, Distributor) {
        DistributionContext::new(config, 1, Arc::new(TracingObserver))
    }

    fn msg(tag: &str) -> Message {
        Message::batch(vec![Event::new(tag, 0, tag)], None)
    }

    fn tag(msg: &Message) -> String {
        match &msg.payload {
            crate::lb::message::Payload::Batch(events) => events[0].source.clone(),
            crate::lb::message::Payload::Event(event) => event.source.clone(),
        }
    }

    #[tokio::test]
    async fn test_retries_are_served_before_new_messages() {
        let config = Config {
            queue_size: 4,
            ..Default::default()
        };
        let (ctx, distributor) = setup(&config);

        assert!(ctx.push(msg("fresh"), true).await);
        ctx.retry(msg("retry"));
        assert_eq!(ctx.retry_depth(), 1);

        let handle = tokio::spawn(distributor.run());

        let first = ctx.receive().await.expect("first message");
        let second = ctx.receive().await.expect("second message");
        assert_eq!(tag(&first), "retry");
        assert_eq!(tag(&second), "fresh");
        assert_eq!(ctx.retry_depth(), 0);

        ctx.cancel.cancel();
        handle.await.expect("distributor task");
    }

    #[tokio::test]
    async fn test_guaranteed_push_is_unbounded() {
        let config = Config {
            queue_size: 2,
            max_attempts: 3,
            ..Default::default()
        };
        let (ctx, distributor) = setup(&config);
        let handle = tokio::spawn(distributor.run());

        assert!(ctx.push(msg("a"), true).await);
        assert!(ctx.push(msg("b"), false).await);

        let a = ctx.receive().await.expect("message a");
        let b = ctx.receive().await.expect("message b");
        assert_eq!(a.attempts_left, None);
        assert_eq!(b.attempts_left, Some(3));

        ctx.cancel.cancel();
        handle.await.expect("distributor task");
    }

    #[tokio::test]
    async fn test_zero_max_attempts_means_unlimited() {
        let config = Config {
            max_attempts: 0,
            ..Default::default()
        };
        let (ctx, distributor) = setup(&config);
        let handle = tokio::spawn(distributor.run());

        assert!(ctx.push(msg("a"), false).await);
        let a = ctx.receive().await.expect("message a");
        assert_eq!(a.attempts_left, None);

        ctx.cancel.cancel();
        handle.await.expect("distributor task");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_push_drops_after_timeouts() {
        let config = Config {
            queue_size: 1,
            max_attempts: 2,
            timeout: Duration::from_millis(10),
            ..Default::default()
        };
        // No distributor: the queue fills up and stays full.
        let (ctx, _distributor) = setup(&config);

        assert!(ctx.push(msg("fills-queue"), false).await);

        let (signal, outcome) = sync_signal();
        let blocked = Message::batch(vec![Event::new("a", 0, "x")], Some(signal));
        assert!(!ctx.push(blocked, false).await);

        assert_eq!(ctx.counters.dropped.load(Ordering::Relaxed), 1);
        // Dropped messages release their signal without resolving it.
        assert!(outcome.await.is_err());
    }

    #[tokio::test]
    async fn test_push_after_cancel_signals_canceled() {
        let (ctx, _distributor) = setup(&Config::default());
        ctx.cancel.cancel();

        let (signal, outcome) = sync_signal();
        let accepted = ctx
            .push(Message::batch(vec![Event::new("a", 0, "x")], Some(signal)), true)
            .await;

        assert!(!accepted);
        assert_eq!(outcome.await.expect("outcome"), Outcome::Canceled);
    }

    #[tokio::test]
    async fn test_retry_after_cancel_signals_canceled() {
        let (ctx, _distributor) = setup(&Config::default());
        ctx.cancel.cancel();

        let (signal, outcome) = sync_signal();
        ctx.retry(Message::batch(vec![Event::new("a", 0, "x")], Some(signal)));

        assert_eq!(outcome.await.expect("outcome"), Outcome::Canceled);
        assert_eq!(ctx.retry_depth(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_messages() {
        let config = Config {
            queue_size: 4,
            ..Default::default()
        };
        let (ctx, distributor) = setup(&config);

        let (fresh_signal, fresh) = sync_signal();
        let (retry_signal, retried) = sync_signal();
        assert!(
            ctx.push(
                Message::batch(vec![Event::new("a", 0, "x")], Some(fresh_signal)),
                true
            )
            .await
        );
        ctx.retry(Message::batch(
            vec![Event::new("b", 0, "y")],
            Some(retry_signal),
        ));

        ctx.cancel.cancel();
        distributor.run().await;

        assert_eq!(fresh.await.expect("outcome"), Outcome::Canceled);
        assert_eq!(retried.await.expect("outcome"), Outcome::Canceled);
        assert_eq!(ctx.retry_depth(), 0);
    }

    #[tokio::test]
    async fn test_receive_returns_none_when_cancelled() {
        let (ctx, distributor) = setup(&Config::default());
        let handle = tokio::spawn(distributor.run());

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.receive().await })
        };
        ctx.cancel.cancel();

        assert!(waiter.await.expect("receive task").is_none());
        handle.await.expect("distributor task");
    }
}
