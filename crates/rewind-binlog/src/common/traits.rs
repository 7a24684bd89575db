//! Collaborator traits
//!
//! The pipeline depends on three seams: a schema catalog (column names, file
//! listing, GTID capability), an event source per binlog file, and an opener
//! that produces sources at a given offset.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::common::{DecodedEvent, LogFile, LogFileEntry, Result};

/// Schema and replication metadata of the source database.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Column names of `schema.table` in ordinal order.
    async fn columns_of(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Binlog files known to the source, oldest first.
    async fn list_log_files(&self) -> Result<Vec<LogFileEntry>>;

    /// Whether global transaction identifiers are enabled.
    async fn gtid_enabled(&self) -> Result<bool>;

    /// Directory the binlog files live in.
    async fn binlog_directory(&self) -> Result<PathBuf>;
}

/// Lazy, finite sequence of decoded events from one binlog file.
///
/// Iteration stops when the caller stops pulling; there is no mid-event
/// cancellation.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` at the end of the file.
    async fn next_event(&mut self) -> Result<Option<DecodedEvent>>;
}

/// Opens (or reopens) an event source for a file at an offset.
#[async_trait]
pub trait EventSourceOpener: Send + Sync {
    async fn open(&self, file: &LogFile, offset: u64) -> Result<Box<dyn EventSource>>;
}
