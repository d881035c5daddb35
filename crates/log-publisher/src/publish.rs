// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::{Batch, Event};
use crate::signal::Signal;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Retry until delivered or shut down, ignoring the attempt budget.
    pub guaranteed: bool,
}

impl PublishOptions {
    #[must_use]
    pub fn guaranteed() -> Self {
        Self { guaranteed: true }
    }
}

/// Delivery capability the publishers hand their batches to.
///
/// Calls return once the work was accepted (or refused); the outcome arrives
/// later through `signal`.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish_events(&self, events: Batch, signal: Option<Signal>, options: PublishOptions);

    async fn publish_event(&self, event: Event, signal: Option<Signal>, options: PublishOptions);

    /// Stops delivery. Work still pending is signaled canceled.
    async fn close(&self);
}
