// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::entry::LogPayload;

/// A job that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub job_id: Uuid,
    /// The payload exactly as it was taken off the queue.
    pub payload: LogPayload,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Terminal sink for permanently failed jobs.
pub trait DeadLetterObserver: Send + Sync {
    fn observe(&self, letter: DeadLetter);

    /// Total number of letters observed since start.
    fn count(&self) -> u64;
}

/// Logs every dead letter and keeps the most recent ones in memory.
#[derive(Debug)]
pub struct DeadLetterLog {
    retention: usize,
    recent: Mutex<VecDeque<DeadLetter>>,
    total: AtomicU64,
}

impl DeadLetterLog {
    pub fn new(retention: usize) -> Self {
        DeadLetterLog {
            retention,
            recent: Mutex::new(VecDeque::with_capacity(retention)),
            total: AtomicU64::new(0),
        }
    }

    /// Retained letters, oldest first.
    pub fn recent(&self) -> Vec<DeadLetter> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl DeadLetterObserver for DeadLetterLog {
    fn observe(&self, letter: DeadLetter) {
        let payload = serde_json::to_string(&letter.payload)
            .unwrap_or_else(|e| format!("<unserializable payload: {e}>"));
        error!(
            "Failed to process log entry after {} attempts: job={} data={} exception={}",
            letter.attempts, letter.job_id, payload, letter.error
        );

        self.total.fetch_add(1, Ordering::Relaxed);
        if self.retention == 0 {
            return;
        }
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == self.retention {
            recent.pop_front();
        }
        recent.push_back(letter);
    }

    fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
