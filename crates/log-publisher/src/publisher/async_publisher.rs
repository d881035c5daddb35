// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipelined publisher.
//!
//! Every incoming batch is published right away and appended to the
//! collector's queue. After each new batch, and on an idle tick of
//! `gc_timeout`, the collector forwards finished batches in publish order.

use crate::errors::PublisherError;
use crate::event::{wire_payload, Batch};
use crate::observer::Observer;
use crate::publish::{Publish, PublishOptions};
use crate::publisher::batch::{BatchRecord, BatchStatus};
use crate::publisher::collector::Collector;
use crate::publisher::{LogPublisher, PublisherTask};
use crate::signal::Signal;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct AsyncLogPublisher {
    input: Option<mpsc::Receiver<Batch>>,
    output: mpsc::Sender<Batch>,
    gc_timeout: Duration,
    observer: Arc<dyn Observer>,
    task: PublisherTask,
}

impl AsyncLogPublisher {
    #[must_use]
    pub fn new(
        input: mpsc::Receiver<Batch>,
        output: mpsc::Sender<Batch>,
        client: Arc<dyn Publish>,
        gc_timeout: Duration,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            input: Some(input),
            output,
            gc_timeout,
            observer,
            task: PublisherTask::new(client),
        }
    }
}

#[async_trait]
impl LogPublisher for AsyncLogPublisher {
    fn start(&mut self) {
        let Some(input) = self.input.take() else {
            return;
        };
        debug!("PUBLISHER | Start sending events to output");

        let collector = Collector::new(
            self.output.clone(),
            self.task.cancel.clone(),
            self.observer.clone(),
        );
        self.task.handle = Some(tokio::spawn(run(
            input,
            self.task.client.clone(),
            collector,
            self.gc_timeout,
            self.task.cancel.clone(),
        )));
    }

    async fn stop(&mut self) -> Result<(), PublisherError> {
        self.task.stop().await
    }
}

async fn run(
    mut input: mpsc::Receiver<Batch>,
    client: Arc<dyn Publish>,
    mut collector: Collector,
    gc_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), PublisherError> {
    let mut ticker = tokio::time::interval(gc_timeout);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick, which is instantaneous

    let mut input_open = true;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            batch = input.recv(), if input_open => match batch {
                Some(events) => publish(client.as_ref(), &mut collector, events, &cancel).await,
                None => {
                    debug!("PUBLISHER | Input closed, collecting in-flight batches");
                    input_open = false;
                }
            },
            _ = ticker.tick() => {}
        }

        match collector.collect().await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) => {
                error!("PUBLISHER | {err}");
                cancel.cancel();
                return Err(err);
            }
        }
    }
}

async fn publish(
    client: &dyn Publish,
    collector: &mut Collector,
    events: Batch,
    cancel: &CancellationToken,
) {
    let payload = wire_payload(&events);
    let record = BatchRecord::new(events);

    if payload.is_empty() {
        record.finish(BatchStatus::Success);
    } else {
        let signal: Signal = record.signal();
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = client.publish_events(payload, Some(signal), PublishOptions::guaranteed()) => {}
        }
    }

    collector.push(record);
}
