// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building or validating a [`crate::config::BatchSinkConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Batch size must be greater than 0")]
    InvalidBatchSize,

    #[error("Queue limit must be greater than 0")]
    InvalidQueueLimit,

    #[error("Time to sleep between batches must be greater than 0")]
    InvalidInterval,

    #[error("Unknown overflow action '{0}'. Must be one of: grow, discard, block")]
    UnknownOverflowAction(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Outcome handed to an event or flush completion when the work did not
/// reach the downstream successfully.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The downstream rejected the event.
    #[error("Sink failed to write event: {0}")]
    Sink(String),

    /// The queue was full and the overflow action is `Discard`.
    #[error("Event dropped: queue limit reached")]
    Dropped,

    /// The downstream released the event without completing it.
    #[error("Event abandoned by sink without completion")]
    Abandoned,

    /// The batch sink was already shut down.
    #[error("Batch sink is closed")]
    Closed,
}

/// Errors returned by the control surface of a running batch sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Flush failed: {0}")]
    Flush(#[from] DeliveryError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
