// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of pipeline components for testing

use async_trait::async_trait;
use log_intake::entry::{LogEntry, LogRecord};
use log_intake::error::{QueueError, StoreError};
use log_intake::queue::{IngestJob, IngestionQueue, JobHandle};
use log_intake::store::{LogStore, MemoryStore, Page, PageRequest, SearchFilters};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// Store whose first `failures` writes fail, then behaves like a memory store
pub struct FlakyStore {
    failures: u32,
    calls: AtomicU32,
    inner: MemoryStore,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        FlakyStore {
            failures,
            calls: AtomicU32::new(0),
            inner: MemoryStore::new(),
        }
    }

    /// A store that never accepts a write
    pub fn always_failing() -> Self {
        FlakyStore::new(u32::MAX)
    }

    pub fn write_attempts(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for FlakyStore {
    async fn create(&self, record: LogRecord) -> Result<LogEntry, StoreError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.create(record).await
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<LogEntry>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn search(
        &self,
        filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<Page<LogEntry>, StoreError> {
        self.inner.search(filters, page).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

/// Store that is unreachable for every operation
#[allow(dead_code)]
pub struct UnavailableStore;

#[async_trait]
impl LogStore for UnavailableStore {
    async fn create(&self, _record: LogRecord) -> Result<LogEntry, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn find_by_id(&self, _id: &Uuid) -> Result<Option<LogEntry>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn search(
        &self,
        _filters: &SearchFilters,
        _page: PageRequest,
    ) -> Result<Page<LogEntry>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Queue that refuses every job as if its broker were down
#[allow(dead_code)]
pub struct ClosedQueue;

#[async_trait]
impl IngestionQueue for ClosedQueue {
    async fn enqueue(&self, _job: IngestJob) -> Result<JobHandle, QueueError> {
        Err(QueueError::Closed)
    }

    fn depth(&self) -> usize {
        0
    }
}
