// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deferred persistence of queued log entries.
//!
//! ```text
//!   JobReceiver ──> worker 0 ─┐
//!               ──> worker 1 ─┼──> normalize ──> LogStore::create (timeout, retry)
//!               ──> worker N ─┘                         │
//!                                                       └── budget exhausted ──> DeadLetterObserver
//! ```
//!
//! Each worker runs one job to completion before taking the next. The entry id
//! is fixed before the first attempt, so every retry writes the same id and the
//! store's upsert-by-id keeps a single record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::dead_letter::{DeadLetter, DeadLetterObserver};
use crate::entry::{normalize, LogEntry, LogRecord};
use crate::error::{PermanentWriteFailure, WriteError};
use crate::queue::{IngestJob, JobReceiver};
use crate::store::LogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per job, including the first.
    pub max_attempts: u32,
    /// Hard limit on a single attempt.
    pub attempt_timeout: Duration,
    /// Delay before the second attempt; doubles for each later one.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        RetryPolicy {
            max_attempts: config.job_max_attempts,
            attempt_timeout: Duration::from_secs(config.job_timeout_secs),
            backoff_base: Duration::from_millis(config.job_retry_backoff_base_ms),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

pub struct WriteWorker {
    store: Arc<dyn LogStore>,
    dead_letters: Arc<dyn DeadLetterObserver>,
    policy: RetryPolicy,
}

impl WriteWorker {
    pub fn new(
        store: Arc<dyn LogStore>,
        dead_letters: Arc<dyn DeadLetterObserver>,
        policy: RetryPolicy,
    ) -> Self {
        WriteWorker {
            store,
            dead_letters,
            policy,
        }
    }

    /// Persists one job, retrying within the policy.
    ///
    /// A job that runs out of attempts is reported to the dead-letter observer
    /// before the failure is returned.
    pub async fn process(&self, job: IngestJob) -> Result<LogEntry, PermanentWriteFailure> {
        let record = normalize(job.payload.clone(), Utc::now());
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let source = match self.attempt(record.clone()).await {
                Ok(entry) => {
                    debug!(
                        "Stored log entry {} (job {}, attempt {attempt})",
                        entry.id, job.job_id
                    );
                    return Ok(entry);
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                self.dead_letters.observe(DeadLetter {
                    job_id: job.job_id,
                    payload: job.payload,
                    error: source.to_string(),
                    attempts: attempt,
                    failed_at: Utc::now(),
                });
                return Err(PermanentWriteFailure {
                    entry_id: record.id,
                    attempts: attempt,
                    source,
                });
            }

            warn!(
                "Write attempt {attempt}/{max_attempts} for log entry {} failed: {source}",
                record.id
            );
            tokio::time::sleep(self.policy.backoff(attempt)).await;
        }
    }

    async fn attempt(&self, record: LogRecord) -> Result<LogEntry, WriteError> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.store.create(record)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WriteError::Timeout(self.policy.attempt_timeout)),
        }
    }

    /// Takes jobs until cancelled or until the queue is closed and empty.
    ///
    /// After cancellation the job in hand is finished and jobs already waiting
    /// in the queue are drained.
    pub async fn run(self: Arc<Self>, jobs: JobReceiver, cancel: CancellationToken) {
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => return,
                },
            };
            // failures are already routed to the dead-letter observer
            let _ = self.process(job).await;
        }

        let mut drained = 0;
        while let Some(job) = jobs.try_recv().await {
            let _ = self.process(job).await;
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {drained} queued jobs on shutdown");
        }
    }
}

/// A fixed number of [`WriteWorker`] tasks sharing one queue.
pub struct WorkerPool {
    worker: Arc<WriteWorker>,
    jobs: JobReceiver,
    size: usize,
}

impl WorkerPool {
    pub fn new(worker: Arc<WriteWorker>, jobs: JobReceiver, size: usize) -> Self {
        WorkerPool {
            worker,
            jobs,
            size: size.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawns the workers. They stop once `cancel` fires and the queue has drained.
    pub fn start(self, cancel: CancellationToken) -> WorkerPoolHandle {
        let mut workers = JoinSet::new();
        for _ in 0..self.size {
            let worker = Arc::clone(&self.worker);
            let jobs = self.jobs.clone();
            let cancel = cancel.clone();
            workers.spawn(worker.run(jobs, cancel));
        }
        debug!("Started {} write workers", self.size);
        WorkerPoolHandle {
            workers,
            worker: self.worker,
            jobs: self.jobs,
            cancel,
        }
    }
}

pub struct WorkerPoolHandle {
    workers: JoinSet<()>,
    worker: Arc<WriteWorker>,
    jobs: JobReceiver,
    cancel: CancellationToken,
}

impl WorkerPoolHandle {
    /// Stops the workers, closes the queue to new jobs and persists whatever is
    /// still queued before returning.
    pub async fn shutdown(mut self) {
        // idle workers hold the receiver while waiting, so they must stop first
        self.cancel.cancel();
        self.jobs.close().await;
        self.join().await;

        while let Some(job) = self.jobs.try_recv().await {
            let _ = self.worker.process(job).await;
        }
    }

    /// Waits for every worker to exit.
    pub async fn join(&mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("Write worker exited abnormally: {e}");
            }
        }
    }
}
