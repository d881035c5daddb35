// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured pipeline events.
//!
//! Failure paths of the pool and the publishers report what happened through
//! an injected [`Observer`] instead of logging directly. [`TracingObserver`]
//! is the default and turns each event into one `tracing` record; tests plug
//! in a recorder.

use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Connected {
        worker: usize,
    },
    ConnectFailed {
        worker: usize,
        error: String,
        retry_in: Duration,
    },
    /// A dispatch or its acknowledgement failed and the events go back for
    /// another attempt.
    PublishFailed {
        worker: Option<usize>,
        events: usize,
        attempts_left: Option<u32>,
        error: String,
    },
    /// The endpoint accepted part of a batch; the rest is sent again.
    Requeued {
        worker: Option<usize>,
        events: usize,
    },
    RetryBacklog {
        depth: usize,
    },
    /// Events given up on after running out of attempts.
    Dropped {
        events: usize,
        reason: String,
    },
    BatchCanceled {
        events: usize,
    },
    RegistrarUpdateSkipped {
        events: usize,
    },
    /// A batch reported failed although it was published with guaranteed
    /// delivery.
    BatchFailed {
        events: usize,
    },
}

pub trait Observer: Send + Sync {
    fn observe(&self, event: &PipelineEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Connected { worker } => {
                debug!(worker, "LB | Connected to endpoint");
            }
            PipelineEvent::ConnectFailed {
                worker,
                error,
                retry_in,
            } => {
                warn!(worker, %error, ?retry_in, "LB | Connect failed");
            }
            PipelineEvent::PublishFailed {
                worker,
                events,
                attempts_left,
                error,
            } => {
                info!(
                    ?worker,
                    events,
                    ?attempts_left,
                    %error,
                    "LB | Error publishing events (retrying)"
                );
            }
            PipelineEvent::Requeued { worker, events } => {
                debug!(?worker, events, "LB | Partial send, retrying remaining events");
            }
            PipelineEvent::RetryBacklog { depth } => {
                warn!(depth, "LB | Retry backlog is growing");
            }
            PipelineEvent::Dropped { events, reason } => {
                error!(events, %reason, "LB | Dropping events after exhausting attempts");
            }
            PipelineEvent::BatchCanceled { events } => {
                info!(events, "PUBLISHER | Batch canceled, shutting down");
            }
            PipelineEvent::RegistrarUpdateSkipped { events } => {
                info!(
                    events,
                    "PUBLISHER | Shutting down - no registrar update for potentially published batch"
                );
            }
            PipelineEvent::BatchFailed { events } => {
                error!(events, "PUBLISHER | Batch failed under guaranteed delivery");
            }
        }
    }
}
