// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persistence and indexed query over durable log entries.
//!
//! Every adapter keeps the same index layout (see [`index::LogIndex`]):
//!
//! ```text
//!   primary:    id
//!   secondary:  timestamp desc
//!               trace_id, timestamp desc
//!               level, timestamp desc
//!               service_name, timestamp desc
//!               service_name, level, timestamp desc
//! ```
//!
//! Writes are upserts keyed by `id`: writing an id that is already stored
//! returns the stored entry unchanged, so a retried job converges on a single
//! record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::entry::{Level, LogEntry, LogRecord};
use crate::error::StoreError;

pub mod file;
pub(crate) mod index;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub const DEFAULT_PER_PAGE: usize = 15;
pub const MAX_PER_PAGE: usize = 100;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Writes a record, or returns the already stored entry with the same id.
    async fn create(&self, record: LogRecord) -> Result<LogEntry, StoreError>;

    async fn find_by_id(&self, id: &Uuid) -> Result<Option<LogEntry>, StoreError>;

    /// Returns one page of matching entries, most recent `timestamp` first.
    async fn search(
        &self,
        filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<Page<LogEntry>, StoreError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize, StoreError>;
}

/// Conjunctive search filters. `None` (or an empty service name) matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub trace_id: Option<Uuid>,
    pub level: Option<Level>,
    pub service_name: Option<String>,
    /// Inclusive lower bound on `timestamp`.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.trace_id.map_or(true, |trace_id| entry.trace_id == trace_id)
            && self.level.map_or(true, |level| entry.level == level)
            && self
                .service_name()
                .map_or(true, |name| entry.service_name == name)
            && self.date_from.map_or(true, |from| entry.timestamp >= from)
            && self.date_to.map_or(true, |to| entry.timestamp <= to)
    }
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    /// Clamps `page` to at least 1 and `per_page` to `[1, MAX_PER_PAGE]`.
    pub fn new(page: usize, per_page: usize) -> Self {
        PageRequest {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest::new(1, DEFAULT_PER_PAGE)
    }
}

/// A length-aware page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub per_page: usize,
    pub current_page: usize,
}

impl<T> Page<T> {
    pub fn empty(request: PageRequest) -> Self {
        Page {
            items: Vec::new(),
            total: 0,
            per_page: request.per_page,
            current_page: request.page,
        }
    }

    pub fn last_page(&self) -> usize {
        self.total.div_ceil(self.per_page).max(1)
    }

    /// 1-based position of the first item on this page, if any.
    pub fn from(&self) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        Some((self.current_page - 1) * self.per_page + 1)
    }

    /// 1-based position of the last item on this page, if any.
    pub fn to(&self) -> Option<usize> {
        self.from().map(|from| from + self.items.len() - 1)
    }
}
