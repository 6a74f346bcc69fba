// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entry::LogPayload;
use crate::error::QueueError;

/// One unit of deferred write work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    pub job_id: Uuid,
    pub payload: LogPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl IngestJob {
    pub fn new(payload: LogPayload) -> Self {
        IngestJob {
            job_id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// Acknowledgment that a job was accepted by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

#[async_trait]
pub trait IngestionQueue: Send + Sync {
    /// Hands a job to the queue without waiting for it to be processed.
    async fn enqueue(&self, job: IngestJob) -> Result<JobHandle, QueueError>;

    /// Jobs accepted but not yet taken by a worker.
    fn depth(&self) -> usize;
}

/// Bounded in-process queue over a tokio mpsc channel.
///
/// `enqueue` never waits: a full channel is reported as [`QueueError::Full`].
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<IngestJob>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (ChannelQueue, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            ChannelQueue { tx },
            JobReceiver {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }
}

#[async_trait]
impl IngestionQueue for ChannelQueue {
    async fn enqueue(&self, job: IngestJob) -> Result<JobHandle, QueueError> {
        let handle = JobHandle {
            job_id: job.job_id,
            enqueued_at: job.enqueued_at,
        };
        match self.tx.try_send(job) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Full(_)) => Err(QueueError::Full),
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Receiving side of a [`ChannelQueue`], shared by every worker.
///
/// Each call hands a job to exactly one caller.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<IngestJob>>>,
}

impl JobReceiver {
    /// Waits for the next job. `None` once every sender is gone and the queue is empty.
    pub async fn recv(&self) -> Option<IngestJob> {
        self.rx.lock().await.recv().await
    }

    /// Takes a job only if one is already waiting.
    pub async fn try_recv(&self) -> Option<IngestJob> {
        match self.rx.lock().await.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Stops accepting new jobs; already queued jobs can still be received.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }
}
