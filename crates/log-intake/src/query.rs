// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::entry::LogEntry;
use crate::error::StoreError;
use crate::store::{LogStore, Page, PageRequest, SearchFilters};

/// Read side of the pipeline. Only sees entries a worker already persisted.
pub struct QueryService {
    store: Arc<dyn LogStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        QueryService { store }
    }

    /// Entries matching every filter, most recent first.
    pub async fn search(
        &self,
        filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<Page<LogEntry>, StoreError> {
        let result = self.store.search(filters, page).await?;
        debug!(
            "Log search matched {} entries, returning page {} of {}",
            result.total,
            result.current_page,
            result.last_page()
        );
        Ok(result)
    }

    pub async fn find_by_id(&self, id: &Uuid) -> Result<Option<LogEntry>, StoreError> {
        self.store.find_by_id(id).await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.len().await
    }
}
