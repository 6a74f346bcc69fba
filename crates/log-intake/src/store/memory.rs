// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::entry::{LogEntry, LogRecord};
use crate::error::StoreError;
use crate::store::index::LogIndex;
use crate::store::{LogStore, Page, PageRequest, SearchFilters};

/// Volatile store keeping every entry in an in-memory index.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<LogIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn create(&self, record: LogRecord) -> Result<LogEntry, StoreError> {
        let entry = LogEntry::from_record(record, Utc::now());
        let (stored, inserted) = self.index.write().await.insert(entry);
        if !inserted {
            debug!("Log entry {} already stored, keeping existing record", stored.id);
        }
        Ok(stored)
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<LogEntry>, StoreError> {
        Ok(self.index.read().await.get(id).cloned())
    }

    async fn search(
        &self,
        filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<Page<LogEntry>, StoreError> {
        Ok(self.index.read().await.search(filters, page))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.index.read().await.len())
    }
}
