// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable store writing one JSON document per line.
//!
//! The file is the source of truth; the in-memory [`LogIndex`] is rebuilt from
//! it on open. Lines that fail to parse are skipped with a warning, and when an
//! id appears more than once the first occurrence wins. An append that fails
//! part-way is truncated away before the next one, so a retried write always
//! starts on a fresh line.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entry::{LogEntry, LogRecord};
use crate::error::StoreError;
use crate::store::index::LogIndex;
use crate::store::{LogStore, Page, PageRequest, SearchFilters};

#[derive(Debug)]
pub struct FileStore {
    /// Serializes writers so the existence check and the append happen as one step.
    file: Mutex<LogFile>,
    index: RwLock<LogIndex>,
}

/// The append handle plus the length of the file up to its last complete line.
#[derive(Debug)]
struct LogFile {
    file: File,
    committed_len: u64,
}

impl LogFile {
    async fn append(&mut self, line: &[u8]) -> Result<(), StoreError> {
        let on_disk = self.file.metadata().await?.len();
        if on_disk != self.committed_len {
            warn!(
                "Discarding {} bytes left by an incomplete write",
                on_disk.saturating_sub(self.committed_len)
            );
            self.file.set_len(self.committed_len).await?;
        }

        if let Err(e) = self.write_line(line).await {
            if let Err(truncate_err) = self.file.set_len(self.committed_len).await {
                warn!("Failed to discard incomplete write: {truncate_err}");
            }
            return Err(e.into());
        }
        self.committed_len += line.len() as u64;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await
    }
}

impl FileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let index = replay(path, &contents);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        // a torn final line must not swallow the next append
        if contents.last().is_some_and(|byte| *byte != b'\n') {
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        let committed_len = file.metadata().await?.len();

        info!(
            "Opened log store at {} with {} entries",
            path.display(),
            index.len()
        );

        Ok(FileStore {
            file: Mutex::new(LogFile {
                file,
                committed_len,
            }),
            index: RwLock::new(index),
        })
    }
}

fn replay(path: &Path, contents: &[u8]) -> LogIndex {
    let mut index = LogIndex::new();
    let mut skipped = 0usize;

    for (line_no, line) in contents.split(|byte| *byte == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<LogEntry>(line) {
            Ok(entry) => {
                index.insert(entry);
            }
            Err(e) => {
                skipped += 1;
                warn!(
                    "Skipping unreadable line {} in {}: {e}",
                    line_no + 1,
                    path.display()
                );
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {skipped} unreadable lines in {}", path.display());
    }
    index
}

#[async_trait]
impl LogStore for FileStore {
    async fn create(&self, record: LogRecord) -> Result<LogEntry, StoreError> {
        let mut file = self.file.lock().await;

        if let Some(existing) = self.index.read().await.get(&record.id) {
            debug!("Log entry {} already stored, keeping existing record", existing.id);
            return Ok(existing.clone());
        }

        let entry = LogEntry::from_record(record, Utc::now());
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        file.append(&line).await?;

        let (stored, _) = self.index.write().await.insert(entry);
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
