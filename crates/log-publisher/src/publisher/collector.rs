// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered hand-off of finished batches to the registrar.
//!
//! Batches complete in any order, but the registrar must see them in publish
//! order. Only the head of the queue may leave it:
//!
//! ```text
//!   head                                   tail
//!   [Success] [Success] [InProgress] [Success]
//!   └─── forwarded ───┘ └──── wait for head ──┘
//! ```
//!
//! Once a batch comes back canceled the publisher is shutting down. From then
//! on every remaining record is unlinked without being forwarded, since
//! forwarding anything after a gap would let the registrar skip past events
//! that were never delivered.

use crate::errors::PublisherError;
use crate::event::Batch;
use crate::observer::{Observer, PipelineEvent};
use crate::publisher::batch::{BatchQueue, BatchRecord, BatchStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Collector {
    active: BatchQueue,
    stopping: bool,
    output: mpsc::Sender<Batch>,
    cancel: CancellationToken,
    observer: Arc<dyn Observer>,
}

impl Collector {
    #[must_use]
    pub fn new(
        output: mpsc::Sender<Batch>,
        cancel: CancellationToken,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            active: BatchQueue::default(),
            stopping: false,
            output,
            cancel,
            observer,
        }
    }

    pub fn push(&mut self, record: BatchRecord) {
        self.active.push(record);
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Forwards every finished batch at the head of the queue.
    ///
    /// Returns `Ok(false)` if interrupted by cancellation while forwarding.
    pub async fn collect(&mut self) -> Result<bool, PublisherError> {
        while let Some(head) = self.active.front() {
            let status = head.status();
            if status == BatchStatus::InProgress && !self.stopping {
                break;
            }
            if status == BatchStatus::Failed {
                let events = head.events.len();
                self.observer
                    .observe(&PipelineEvent::BatchFailed { events });
                return Err(PublisherError::BatchFailed { events });
            }

            let Some(record) = self.active.pop_front() else {
                break;
            };
            if status == BatchStatus::Canceled {
                self.observer.observe(&PipelineEvent::BatchCanceled {
                    events: record.events.len(),
                });
                self.stopping = true;
            }
            if self.stopping {
                self.observer
                    .observe(&PipelineEvent::RegistrarUpdateSkipped {
                        events: record.events.len(),
                    });
                continue;
            }

            let events = record.events.len();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!("PUBLISHER | Shutting down, batch not forwarded to registrar");
                    return Ok(false);
                }
                sent = self.output.send(record.events) => {
                    if sent.is_err() {
                        return Err(PublisherError::OutputClosed);
                    }
                    info!("PUBLISHER | Events sent: {}", events);
                }
            }
        }

        Ok(true)
    }
}
