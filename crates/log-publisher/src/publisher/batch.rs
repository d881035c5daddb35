// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::Batch;
use crate::signal::Signaler;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchStatus {
    InProgress = 0,
    Success = 1,
    Failed = 2,
    Canceled = 3,
}

impl BatchStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BatchStatus::Success,
            2 => BatchStatus::Failed,
            3 => BatchStatus::Canceled,
            _ => BatchStatus::InProgress,
        }
    }
}

/// Status shared between a batch record and its completion signal.
///
/// Leaves `InProgress` at most once.
#[derive(Debug, Default)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    #[must_use]
    pub fn load(&self) -> BatchStatus {
        BatchStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Sets a final status. Returns `false` if one was already set.
    pub fn finish(&self, status: BatchStatus) -> bool {
        self.0
            .compare_exchange(
                BatchStatus::InProgress as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// A batch waiting for its turn to reach the registrar.
#[derive(Debug)]
pub struct BatchRecord {
    status: Arc<StatusCell>,
    /// The complete batch, state-update events included.
    pub events: Batch,
}

impl BatchRecord {
    #[must_use]
    pub fn new(events: Batch) -> Self {
        Self {
            status: Arc::new(StatusCell::default()),
            events,
        }
    }

    #[must_use]
    pub fn status(&self) -> BatchStatus {
        self.status.load()
    }

    pub fn finish(&self, status: BatchStatus) -> bool {
        self.status.finish(status)
    }

    /// Completion signal updating this record's status.
    #[must_use]
    pub fn signal(&self) -> Box<BatchSignal> {
        Box::new(BatchSignal {
            status: self.status.clone(),
        })
    }
}

#[derive(Debug)]
pub struct BatchSignal {
    status: Arc<StatusCell>,
}

impl Signaler for BatchSignal {
    fn completed(self: Box<Self>) {
        self.status.finish(BatchStatus::Success);
    }

    fn failed(self: Box<Self>) {
        debug!("PUBLISHER | Batch reported failed");
        self.status.finish(BatchStatus::Failed);
    }

    fn canceled(self: Box<Self>) {
        debug!("PUBLISHER | Batch reported canceled");
        self.status.finish(BatchStatus::Canceled);
    }
}

/// Batch records in publish order.
#[derive(Debug, Default)]
pub struct BatchQueue {
    records: VecDeque<BatchRecord>,
}

impl BatchQueue {
    pub fn push(&mut self, record: BatchRecord) {
        self.records.push_back(record);
    }

    #[must_use]
    pub fn front(&self) -> Option<&BatchRecord> {
        self.records.front()
    }

    pub fn pop_front(&mut self) -> Option<BatchRecord> {
        self.records.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
