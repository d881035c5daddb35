// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Load-balancing worker pool.
//!
//! One worker per endpoint client. All workers pull from the same
//! distribution context, so a message goes to whichever worker is idle and a
//! failed message may be retried on any endpoint.

mod context;
mod message;
mod worker;

use crate::backoff::Backoff;
use crate::client::AsyncClient;
use crate::config::Config;
use crate::errors::ConfigError;
use crate::event::{Batch, Event};
use crate::observer::Observer;
use crate::publish::{Publish, PublishOptions};
use crate::signal::{sig_completed, Signal};
use async_trait::async_trait;
use context::DistributionContext;
use message::Message;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;
use worker::Worker;

/// Delivery counters, in events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadBalancerStats {
    pub published: u64,
    pub retried: u64,
    pub dropped: u64,
    /// Messages currently waiting in the retry channel.
    pub retry_backlog: usize,
}

pub struct LoadBalancer {
    ctx: Arc<DistributionContext>,
}

impl LoadBalancer {
    /// Starts one worker per client. Must be called from a Tokio runtime.
    pub fn new(
        clients: Vec<Box<dyn AsyncClient>>,
        config: &Config,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if clients.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if clients.len() != config.endpoint_count {
            return Err(ConfigError::EndpointMismatch {
                expected: config.endpoint_count,
                actual: clients.len(),
            });
        }

        let (ctx, distributor) = DistributionContext::new(config, clients.len(), observer);
        ctx.tasks.spawn(distributor.run());

        for (id, client) in clients.into_iter().enumerate() {
            let backoff = Backoff::new(ctx.cancel.clone(), config.wait_retry, config.max_wait_retry);
            let worker = Worker::new(id, client, ctx.clone(), backoff);
            ctx.tasks.spawn(worker.run());
        }

        debug!(workers = config.endpoint_count, "LB | Worker pool started");
        Ok(Self { ctx })
    }

    #[must_use]
    pub fn stats(&self) -> LoadBalancerStats {
        let counters = &self.ctx.counters;
        LoadBalancerStats {
            published: counters.published.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            retry_backlog: self.ctx.retry_depth(),
        }
    }

    /// Cancels all workers and waits for them, the distributor and pending
    /// completion handlers to finish. Idempotent.
    pub async fn close(&self) {
        self.ctx.tasks.close();
        self.ctx.cancel.cancel();
        self.ctx.tasks.wait().await;
        debug!("LB | Worker pool stopped");
    }
}

impl Drop for LoadBalancer {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
    }
}

#[async_trait]
impl Publish for LoadBalancer {
    async fn publish_events(&self, events: Batch, signal: Option<Signal>, options: PublishOptions) {
        if events.is_empty() {
            sig_completed(signal);
            return;
        }
        self.ctx
            .push(Message::batch(events, signal), options.guaranteed)
            .await;
    }

    async fn publish_event(&self, event: Event, signal: Option<Signal>, options: PublishOptions) {
        self.ctx
            .push(Message::event(event, signal), options.guaranteed)
            .await;
    }

    async fn close(&self) {
        LoadBalancer::close(self).await;
    }
}
