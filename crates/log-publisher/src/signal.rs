// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Completion signals attached to published work.
//!
//! Every signal method takes `self: Box<Self>`, so a signal resolves at most
//! once. A signal dropped without being invoked reports nothing upstream;
//! that only happens when a bounded message runs out of attempts.

use tokio::sync::oneshot;

/// Receives the final outcome of a published message.
pub trait Signaler: Send + 'static {
    fn completed(self: Box<Self>);
    fn failed(self: Box<Self>);
    fn canceled(self: Box<Self>);
}

pub type Signal = Box<dyn Signaler>;

/// Outcome reported through a [`Signaler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Canceled,
}

pub fn sig_completed(signal: Option<Signal>) {
    if let Some(signal) = signal {
        signal.completed();
    }
}

pub fn sig_canceled(signal: Option<Signal>) {
    if let Some(signal) = signal {
        signal.canceled();
    }
}

/// Signal that forwards its outcome over a oneshot channel.
#[derive(Debug)]
pub struct SyncSignal {
    tx: oneshot::Sender<Outcome>,
}

/// Creates a signal and the receiver a caller waits on for its outcome.
///
/// The receiver errors if the signal is released without being invoked.
#[must_use]
pub fn sync_signal() -> (Signal, oneshot::Receiver<Outcome>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(SyncSignal { tx }), rx)
}

impl SyncSignal {
    fn send(self, outcome: Outcome) {
        // The waiter may have given up already (shutdown).
        let _ = self.tx.send(outcome);
    }
}

impl Signaler for SyncSignal {
    fn completed(self: Box<Self>) {
        self.send(Outcome::Completed);
    }

    fn failed(self: Box<Self>) {
        self.send(Outcome::Failed);
    }

    fn canceled(self: Box<Self>) {
        self.send(Outcome::Canceled);
    }
}
