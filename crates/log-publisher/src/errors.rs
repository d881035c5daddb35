// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors reported by a remote endpoint client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Client is not connected")]
    NotConnected,

    /// The endpoint rejected part of a bulk request with a transient failure.
    #[error("Temporary bulk send failure")]
    TempBulkFailure,

    #[error("Acknowledgement dropped before completion")]
    AckDropped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Publish failed: {0}")]
    Publish(String),
}

impl ClientError {
    /// Only transient bulk failures count against a message's attempt budget
    /// when deciding to drop it.
    #[must_use]
    pub fn is_temp_bulk_failure(&self) -> bool {
        matches!(self, ClientError::TempBulkFailure)
    }
}

/// Errors ending a publisher task.
#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    /// A batch published with guaranteed delivery was reported failed.
    #[error("Batch of {events} events reported failed under guaranteed delivery")]
    BatchFailed { events: usize },

    #[error("Registrar output queue closed")]
    OutputClosed,

    #[error("Publisher task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised while building the pipeline from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("At least one endpoint client is required")]
    NoEndpoints,

    #[error("Expected {expected} endpoint clients, got {actual}")]
    EndpointMismatch { expected: usize, actual: usize },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
