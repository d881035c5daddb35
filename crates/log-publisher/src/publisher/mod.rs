// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Publishers sit between the harvesters' input queue and the registrar.
//!
//! Both variants publish every batch with guaranteed delivery and only hand
//! a batch to the registrar once all of its events were acknowledged. The
//! sync variant keeps one batch in flight. The async variant pipelines
//! batches and restores publish order in the [`Collector`].

pub mod async_publisher;
pub mod batch;
pub mod collector;
pub mod sync_publisher;

pub use async_publisher::AsyncLogPublisher;
pub use collector::Collector;
pub use sync_publisher::SyncLogPublisher;

use crate::config::Config;
use crate::errors::PublisherError;
use crate::event::Batch;
use crate::observer::Observer;
use crate::publish::Publish;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[async_trait]
pub trait LogPublisher: Send {
    /// Spawns the publishing task. Later calls do nothing.
    fn start(&mut self);

    /// Cancels the publisher, closes the delivery client and waits for the
    /// task. Returns the error that ended the task, if any. Idempotent.
    async fn stop(&mut self) -> Result<(), PublisherError>;
}

/// Builds the publisher variant selected by `config.publish_async`.
#[must_use]
pub fn new_publisher(
    config: &Config,
    input: mpsc::Receiver<Batch>,
    output: mpsc::Sender<Batch>,
    client: Arc<dyn Publish>,
    observer: Arc<dyn Observer>,
) -> Box<dyn LogPublisher> {
    if config.publish_async {
        Box::new(AsyncLogPublisher::new(
            input,
            output,
            client,
            config.gc_timeout,
            observer,
        ))
    } else {
        Box::new(SyncLogPublisher::new(input, output, client, observer))
    }
}

/// Task bookkeeping shared by both publisher variants.
struct PublisherTask {
    cancel: CancellationToken,
    client: Arc<dyn Publish>,
    handle: Option<JoinHandle<Result<(), PublisherError>>>,
    client_closed: bool,
}

impl PublisherTask {
    fn new(client: Arc<dyn Publish>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            client,
            handle: None,
            client_closed: false,
        }
    }

    async fn stop(&mut self) -> Result<(), PublisherError> {
        self.cancel.cancel();
        if !self.client_closed {
            self.client_closed = true;
            self.client.close().await;
        }

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let result = handle.await?;
        debug!("PUBLISHER | Stopped");
        result
    }
}
