// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON shapes returned by the HTTP surface.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::entry::{Level, LogEntry};
use crate::ingestion::SubmitReceipt;
use crate::store::Page;

pub const ACCEPTED_MESSAGE: &str = "Log entry accepted for processing.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogResource {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub message: String,
    pub level: Level,
    pub service_name: String,
    #[serde(serialize_with = "rfc3339_utc")]
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "rfc3339_utc")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "rfc3339_utc")]
    pub updated_at: DateTime<Utc>,
}

impl From<LogEntry> for LogResource {
    fn from(entry: LogEntry) -> Self {
        LogResource {
            id: entry.id,
            trace_id: entry.trace_id,
            message: entry.message,
            level: entry.level,
            service_name: entry.service_name,
            timestamp: entry.timestamp,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

fn rfc3339_utc<S: Serializer>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// `{"data": {...}}`
#[derive(Debug, Serialize)]
pub struct SingleResource {
    pub data: LogResource,
}

impl From<LogEntry> for SingleResource {
    fn from(entry: LogEntry) -> Self {
        SingleResource { data: entry.into() }
    }
}

/// Base url of a listing plus its query parameters other than `page`.
#[derive(Debug, Clone)]
pub struct PageUrl {
    path: String,
    params: Vec<(String, String)>,
}

impl PageUrl {
    pub fn new(path: impl Into<String>, query: Option<&str>) -> Self {
        let params = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .filter(|(key, _)| key != "page")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        PageUrl {
            path: path.into(),
            params,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn page(&self, page: usize) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .append_pair("page", &page.to_string())
            .finish();
        format!("{}?{query}", self.path)
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PageLinks {
    pub first: String,
    pub last: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PageMeta {
    pub current_page: usize,
    pub from: Option<usize>,
    pub last_page: usize,
    pub path: String,
    pub per_page: usize,
    pub to: Option<usize>,
    pub total: usize,
}

/// `{"data": [...], "links": {...}, "meta": {...}}`
#[derive(Debug, Serialize)]
pub struct LogCollection {
    pub data: Vec<LogResource>,
    pub links: PageLinks,
    pub meta: PageMeta,
}

impl LogCollection {
    pub fn new(page: Page<LogEntry>, url: &PageUrl) -> Self {
        let last_page = page.last_page();
        let current = page.current_page;
        let links = PageLinks {
            first: url.page(1),
            last: url.page(last_page),
            prev: (current > 1).then(|| url.page(current - 1)),
            next: (current < last_page).then(|| url.page(current + 1)),
        };
        let meta = PageMeta {
            current_page: current,
            from: page.from(),
            last_page,
            path: url.path().to_string(),
            per_page: page.per_page,
            to: page.to(),
            total: page.total,
        };
        LogCollection {
            data: page.items.into_iter().map(LogResource::from).collect(),
            links,
            meta,
        }
    }
}

/// Body of the 202 returned by `POST /logs`.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub message: &'static str,
    pub id: Uuid,
    pub trace_id: Uuid,
}

impl From<SubmitReceipt> for AcceptedResponse {
    fn from(receipt: SubmitReceipt) -> Self {
        AcceptedResponse {
            message: ACCEPTED_MESSAGE,
            id: receipt.id,
            trace_id: receipt.trace_id,
        }
    }
}
