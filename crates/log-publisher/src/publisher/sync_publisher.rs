// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::PublisherError;
use crate::event::{wire_payload, Batch};
use crate::observer::{Observer, PipelineEvent};
use crate::publish::{Publish, PublishOptions};
use crate::publisher::{LogPublisher, PublisherTask};
use crate::signal::{sync_signal, Outcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Publishes one batch at a time and forwards it once confirmed.
pub struct SyncLogPublisher {
    input: Option<mpsc::Receiver<Batch>>,
    output: mpsc::Sender<Batch>,
    observer: Arc<dyn Observer>,
    task: PublisherTask,
}

impl SyncLogPublisher {
    #[must_use]
    pub fn new(
        input: mpsc::Receiver<Batch>,
        output: mpsc::Sender<Batch>,
        client: Arc<dyn Publish>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            input: Some(input),
            output,
            observer,
            task: PublisherTask::new(client),
        }
    }
}

#[async_trait]
impl LogPublisher for SyncLogPublisher {
    fn start(&mut self) {
        let Some(input) = self.input.take() else {
            return;
        };
        debug!("PUBLISHER | Start sending events to output");
        self.task.handle = Some(tokio::spawn(run(
            input,
            self.output.clone(),
            self.task.client.clone(),
            self.task.cancel.clone(),
            self.observer.clone(),
        )));
    }

    async fn stop(&mut self) -> Result<(), PublisherError> {
        self.task.stop().await
    }
}

async fn run(
    mut input: mpsc::Receiver<Batch>,
    output: mpsc::Sender<Batch>,
    client: Arc<dyn Publish>,
    cancel: CancellationToken,
    observer: Arc<dyn Observer>,
) -> Result<(), PublisherError> {
    loop {
        let events = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            batch = input.recv() => match batch {
                Some(events) => events,
                None => {
                    debug!("PUBLISHER | Input closed");
                    return Ok(());
                }
            },
        };

        let payload = wire_payload(&events);
        if !payload.is_empty() {
            let (signal, confirmation) = sync_signal();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                outcome = async {
                    client
                        .publish_events(payload, Some(signal), PublishOptions::guaranteed())
                        .await;
                    confirmation.await
                } => outcome.unwrap_or(Outcome::Canceled),
            };

            match outcome {
                Outcome::Completed => {}
                Outcome::Canceled => {
                    observer.observe(&PipelineEvent::RegistrarUpdateSkipped {
                        events: events.len(),
                    });
                    return Ok(());
                }
                Outcome::Failed => {
                    let events = events.len();
                    observer.observe(&PipelineEvent::BatchFailed { events });
                    cancel.cancel();
                    return Err(PublisherError::BatchFailed { events });
                }
            }
        }

        let count = events.len();
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            sent = output.send(events) => {
                if sent.is_err() {
                    return Err(PublisherError::OutputClosed);
                }
            }
        }
        info!("PUBLISHER | Events sent: {}", count);
    }
}
