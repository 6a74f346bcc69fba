// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entry::{Level, LogEntry};
use crate::store::{Page, PageRequest, SearchFilters};

/// Secondary index key. Ascending order is most recent timestamp first, then id.
type TimeKey = (Reverse<DateTime<Utc>>, Uuid);

type TimeIndex = BTreeSet<TimeKey>;

const MAX_UUID: Uuid = Uuid::from_u128(u128::MAX);

/// In-memory primary and secondary indexes over stored entries.
///
/// Not synchronized; adapters wrap it in their own lock.
#[derive(Debug, Default)]
pub struct LogIndex {
    entries: HashMap<Uuid, LogEntry>,
    by_timestamp: TimeIndex,
    by_trace: HashMap<Uuid, TimeIndex>,
    by_level: HashMap<Level, TimeIndex>,
    by_service: HashMap<String, TimeIndex>,
    by_service_level: HashMap<(String, Level), TimeIndex>,
}

impl LogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &Uuid) -> Option<&LogEntry> {
        self.entries.get(id)
    }

    /// Inserts an entry unless its id is already indexed.
    ///
    /// Returns the stored entry and whether it was newly inserted.
    pub fn insert(&mut self, entry: LogEntry) -> (LogEntry, bool) {
        if let Some(existing) = self.entries.get(&entry.id) {
            return (existing.clone(), false);
        }

        let key: TimeKey = (Reverse(entry.timestamp), entry.id);
        self.by_timestamp.insert(key);
        self.by_trace.entry(entry.trace_id).or_default().insert(key);
        self.by_level.entry(entry.level).or_default().insert(key);
        self.by_service
            .entry(entry.service_name.clone())
            .or_default()
            .insert(key);
        self.by_service_level
            .entry((entry.service_name.clone(), entry.level))
            .or_default()
            .insert(key);

        self.entries.insert(entry.id, entry.clone());
        (entry, true)
    }

    pub fn search(&self, filters: &SearchFilters, request: PageRequest) -> Page<LogEntry> {
        if let (Some(from), Some(to)) = (filters.date_from, filters.date_to) {
            if from > to {
                return Page::empty(request);
            }
        }
        let Some(index) = self.select_index(filters) else {
            return Page::empty(request);
        };

        let mut total = 0;
        let mut items = Vec::with_capacity(request.per_page);
        let offset = request.offset();

        for (_, id) in index.range(time_range(filters)) {
            let Some(entry) = self.entries.get(id) else {
                continue;
            };
            if !filters.matches(entry) {
                continue;
            }
            if total >= offset && items.len() < request.per_page {
                items.push(entry.clone());
            }
            total += 1;
        }

        Page {
            items,
            total,
            per_page: request.per_page,
            current_page: request.page,
        }
    }

    /// Picks the narrowest index able to serve the filters. `None` means some
    /// equality filter has no entries at all.
    fn select_index(&self, filters: &SearchFilters) -> Option<&TimeIndex> {
        if let Some(trace_id) = filters.trace_id {
            return self.by_trace.get(&trace_id);
        }
        match (filters.service_name(), filters.level) {
            (Some(service), Some(level)) => self
                .by_service_level
                .get(&(service.to_string(), level)),
            (Some(service), None) => self.by_service.get(service),
            (None, Some(level)) => self.by_level.get(&level),
            (None, None) => Some(&self.by_timestamp),
        }
    }
}

fn time_range(filters: &SearchFilters) -> (Bound<TimeKey>, Bound<TimeKey>) {
    let start = match filters.date_to {
        Some(to) => Bound::Included((Reverse(to), Uuid::nil())),
        None => Bound::Unbounded,
    };
    let end = match filters.date_from {
        Some(from) => Bound::Included((Reverse(from), MAX_UUID)),
        None => Bound::Unbounded,
    };
    (start, end)
}
