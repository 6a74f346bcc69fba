// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors raised by a [`crate::store::LogStore`] adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised when handing a job to the ingestion queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("ingestion queue is closed")]
    Closed,

    #[error("ingestion queue is full")]
    Full,
}

/// Outcome of a single failed write attempt.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("write attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// A job that used up its whole retry budget.
#[derive(Debug, thiserror::Error)]
#[error("log entry {entry_id} failed after {attempts} attempts: {source}")]
pub struct PermanentWriteFailure {
    pub entry_id: uuid::Uuid,
    pub attempts: u32,
    #[source]
    pub source: WriteError,
}
