// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::entry::{normalize, LogPayload, NewLogEntry};
use crate::error::QueueError;
use crate::queue::{IngestJob, IngestionQueue, JobHandle};

/// Identifiers handed back to the submitter before the entry is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub id: Uuid,
    pub trace_id: Uuid,
    #[serde(skip)]
    pub job: JobHandle,
}

/// Accepts validated entries and defers their persistence to the queue.
pub struct IngestionService {
    queue: Arc<dyn IngestionQueue>,
}

impl IngestionService {
    pub fn new(queue: Arc<dyn IngestionQueue>) -> Self {
        IngestionService { queue }
    }

    /// Assigns identifiers, fills the timestamp and enqueues exactly one job.
    ///
    /// Returns as soon as the queue accepts the job; only a closed or full
    /// queue is an error.
    pub async fn submit(&self, entry: NewLogEntry) -> Result<SubmitReceipt, QueueError> {
        let mut payload = LogPayload::from(entry);
        payload.id = None;
        let record = normalize(payload, Utc::now());
        let (id, trace_id) = (record.id, record.trace_id);

        let job = self.queue.enqueue(IngestJob::new(record.into())).await?;
        debug!("Accepted log entry {id} (trace {trace_id}) as job {}", job.job_id);

        Ok(SubmitReceipt { id, trace_id, job })
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }
}
