// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::{Batch, Event};
use crate::signal::{sig_canceled, sig_completed, Signal};

#[derive(Debug)]
pub(crate) enum Payload {
    Event(Event),
    Batch(Batch),
}

/// Unit of work moving through the pool, first and retry attempts alike.
pub(crate) struct Message {
    /// Index of the worker that claimed the message last.
    pub(crate) worker: Option<usize>,
    /// `None` for unbounded retries.
    pub(crate) attempts_left: Option<u32>,
    pub(crate) signal: Option<Signal>,
    pub(crate) payload: Payload,
}

impl Message {
    pub(crate) fn event(event: Event, signal: Option<Signal>) -> Self {
        Self {
            worker: None,
            attempts_left: None,
            signal,
            payload: Payload::Event(event),
        }
    }

    pub(crate) fn batch(events: Batch, signal: Option<Signal>) -> Self {
        Self {
            worker: None,
            attempts_left: None,
            signal,
            payload: Payload::Batch(events),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match &self.payload {
            Payload::Event(_) => 1,
            Payload::Batch(events) => events.len(),
        }
    }

    pub(crate) fn decrement(&mut self) {
        if let Some(left) = self.attempts_left.as_mut() {
            *left = left.saturating_sub(1);
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.attempts_left == Some(0)
    }

    /// Refills a bounded budget, used after partial progress.
    pub(crate) fn reset_attempts(&mut self, max_attempts: u32) {
        if self.attempts_left.is_some() {
            self.attempts_left = Some(max_attempts);
        }
    }

    /// Replaces a batch payload with the events still to send.
    pub(crate) fn retain_failed(&mut self, failed: Batch) {
        if let Payload::Batch(events) = &mut self.payload {
            *events = failed;
        }
    }

    pub(crate) fn events(&self) -> Batch {
        match &self.payload {
            Payload::Batch(events) => events.clone(),
            Payload::Event(event) => vec![event.clone()],
        }
    }

    pub(crate) fn complete(self) {
        sig_completed(self.signal);
    }

    pub(crate) fn cancel(self) {
        sig_canceled(self.signal);
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("worker", &self.worker)
            .field("attempts_left", &self.attempts_left)
            .field("has_signal", &self.signal.is_some())
            .field("events", &self.len())
            .finish()
    }
}
