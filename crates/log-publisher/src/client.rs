// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capability contract of one remote endpoint.
//!
//! Dispatch is split in two steps. `publish_*` hands the events to the
//! connection and returns as soon as they are on their way; the returned
//! receiver resolves once the endpoint acknowledged them. An error from
//! `publish_*` itself means nothing was sent and the connection is suspect.
//!
//! Clients must drop pending acknowledgement senders when closed. A dropped
//! sender is read as "everything still failed".

use crate::errors::ClientError;
use crate::event::{Batch, Event};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;

/// Result of a bulk dispatch.
///
/// `failed` holds the events that were not accepted, in their original
/// order. `error` is the failure that caused them to be rejected, if any.
/// A result with events in `failed` and no `error` means the endpoint
/// accepted part of the batch and the rest should simply be sent again.
#[derive(Debug, Default)]
pub struct BulkResult {
    pub failed: Batch,
    pub error: Option<ClientError>,
}

impl BulkResult {
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failed(failed: Batch, error: Option<ClientError>) -> Self {
        Self { failed, error }
    }
}

pub type EventAck = oneshot::Receiver<Result<(), ClientError>>;
pub type BulkAck = oneshot::Receiver<BulkResult>;

#[async_trait]
pub trait AsyncClient: Send {
    async fn connect(&mut self, timeout: Duration) -> Result<(), ClientError>;

    async fn close(&mut self) -> Result<(), ClientError>;

    fn is_connected(&self) -> bool;

    async fn publish_event(&mut self, event: &Event) -> Result<EventAck, ClientError>;

    async fn publish_events(&mut self, events: &[Event]) -> Result<BulkAck, ClientError>;
}
