//! In-memory collaborators
//!
//! [`StaticCatalog`] answers catalog queries from fixed data and
//! [`MemorySourceOpener`] replays pre-decoded events per file. Together they
//! run the pipeline without a live server.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::{
    DecodedEvent, EventSource, EventSourceOpener, FlashbackError, LogFile, LogFileEntry, Result,
    SchemaCatalog,
};

/// Catalog backed by fixed table definitions and a fixed file listing.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tables: HashMap<(String, String), Vec<String>>,
    files: Vec<LogFileEntry>,
    gtid: bool,
    directory: PathBuf,
    lookups: Arc<AtomicUsize>,
}

impl StaticCatalog {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    pub fn with_table<I, S>(mut self, schema: &str, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.insert(
            (schema.to_string(), table.to_string()),
            columns.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, size: u64) -> Self {
        self.files.push(LogFileEntry::new(name, size));
        self
    }

    pub fn with_gtid(mut self, enabled: bool) -> Self {
        self.gtid = enabled;
        self
    }

    /// Number of `columns_of` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SchemaCatalog for StaticCatalog {
    async fn columns_of(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        // Unknown tables answer with no columns, like INFORMATION_SCHEMA does
        Ok(self
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_log_files(&self) -> Result<Vec<LogFileEntry>> {
        Ok(self.files.clone())
    }

    async fn gtid_enabled(&self) -> Result<bool> {
        Ok(self.gtid)
    }

    async fn binlog_directory(&self) -> Result<PathBuf> {
        Ok(self.directory.clone())
    }
}

/// Event source over an in-memory event list.
pub struct MemoryEventSource {
    events: std::vec::IntoIter<DecodedEvent>,
}

impl MemoryEventSource {
    pub fn new(events: Vec<DecodedEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn next_event(&mut self) -> Result<Option<DecodedEvent>> {
        Ok(self.events.next())
    }
}

/// Opener replaying pre-decoded events keyed by file name.
///
/// Opening at an offset skips events that start before it.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceOpener {
    files: HashMap<String, Vec<DecodedEvent>>,
}

impl MemorySourceOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, events: Vec<DecodedEvent>) -> Self {
        self.files.insert(name.into(), events);
        self
    }
}

#[async_trait]
impl EventSourceOpener for MemorySourceOpener {
    async fn open(&self, file: &LogFile, offset: u64) -> Result<Box<dyn EventSource>> {
        let events = self.files.get(&file.name).ok_or_else(|| {
            FlashbackError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no events recorded for {}", file.name),
            ))
        })?;
        let events = events
            .iter()
            .filter(|e| e.start_position() >= offset)
            .cloned()
            .collect();
        Ok(Box::new(MemoryEventSource::new(events)))
    }
}
