//! Event filtering
//!
//! Every decoded event is classified as [`FilterDecision::Keep`],
//! [`FilterDecision::Drop`] or [`FilterDecision::Stop`]. Checks run in a
//! fixed order and the first one that decides wins:
//!
//! 1. start time (drop earlier events)
//! 2. stop time (stop on later events)
//! 3. start offset, single-file runs only (drop earlier events)
//! 4. stop offset on the stop file (stop past it)
//! 5. stop file (stop on later or unlisted files)
//! 6. GTID pattern (drop non-matching identities)
//! 7. per-kind schema, table and SQL type allow-lists
//!
//! Start bounds are inclusive: an event ending exactly at the start offset is
//! kept. Stop bounds are exclusive: the first event past them stops the run
//! and is not emitted.
//!
//! # Example
//!
//! ```rust,ignore
//! let filter = EventFilter::new(config.clone(), files.clone())?;
//! match filter.evaluate("mysql-bin.000004", &event, &resolver) {
//!     FilterDecision::Keep => { /* synthesize */ }
//!     FilterDecision::Drop => continue,
//!     FilterDecision::Stop => break,
//! }
//! ```

use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

use crate::common::{
    DecodedEvent, EventPayload, FlashbackConfig, FlashbackError, LogFileList, Result, RowsPayload,
    SqlType, TableMetadataResolver,
};

/// Outcome of filtering one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Pass the event downstream
    Keep,
    /// Skip the event and continue
    Drop,
    /// Halt processing; a normal end of the run
    Stop,
}

/// Compiled filter for one run.
pub struct EventFilter {
    config: Arc<FlashbackConfig>,
    files: Arc<LogFileList>,
    gtid_pattern: Option<Regex>,
    table_patterns: Vec<Regex>,
    sql_types: HashSet<SqlType>,
}

impl EventFilter {
    pub fn new(config: Arc<FlashbackConfig>, files: Arc<LogFileList>) -> Result<Self> {
        let gtid_pattern = config.compiled_gtid_pattern()?;
        let table_patterns = config
            .only_tables
            .iter()
            .map(|p| {
                glob_to_regex(p).map_err(|e| {
                    FlashbackError::config(format!("invalid table pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let sql_types = config.only_sql_types.iter().copied().collect();

        Ok(Self {
            config,
            files,
            gtid_pattern,
            table_patterns,
            sql_types,
        })
    }

    /// Convert a glob pattern to an anchored regex.
    fn glob_to_regex_pattern(pattern: &str) -> String {
        let escaped = regex::escape(pattern);
        format!("^{}$", escaped.replace(r"\*", ".*").replace(r"\?", "."))
    }

    /// Classify `event`, read from the binlog file named `file`.
    pub fn evaluate(
        &self,
        file: &str,
        event: &DecodedEvent,
        resolver: &TableMetadataResolver,
    ) -> FilterDecision {
        let config = &self.config;
        let timestamp = i64::from(event.timestamp);
        let end = event.log_position;

        if matches!(config.start_time, Some(start) if timestamp < start) {
            trace!("drop at {}:{}: before start time", file, end);
            return FilterDecision::Drop;
        }
        if matches!(config.stop_time, Some(stop) if timestamp > stop) {
            return FilterDecision::Stop;
        }
        if config.is_single_file() && config.start_position != 0 && end < config.start_position {
            trace!("drop at {}:{}: before start position", file, end);
            return FilterDecision::Drop;
        }

        if let Some(stop_file) = config.stop_file_name() {
            if file == stop_file && config.stop_position != 0 && end > config.stop_position {
                return FilterDecision::Stop;
            }
            match (self.files.index_of(file), self.files.index_of(stop_file)) {
                (Some(current), Some(stop)) if current <= stop => {}
                _ => return FilterDecision::Stop,
            }
        }

        if let (Some(pattern), EventPayload::TransactionIdentity { gtid: Some(gtid) }) =
            (&self.gtid_pattern, &event.payload)
        {
            if !pattern.is_match(gtid) {
                trace!("drop GTID {}: pattern mismatch", gtid);
                return FilterDecision::Drop;
            }
        }

        let decision = self.evaluate_kind(event, resolver);
        if decision == FilterDecision::Drop {
            trace!("drop {:?} at {}:{}: not allowed", event.kind(), file, end);
        }
        decision
    }

    fn evaluate_kind(&self, event: &DecodedEvent, resolver: &TableMetadataResolver) -> FilterDecision {
        if let (Some(sql_type), Some(rows)) = (event.kind().sql_type(), event.rows()) {
            return self.rows_decision(sql_type, rows, resolver);
        }
        match &event.payload {
            EventPayload::TransactionBegin { schema } => self.schema_decision(schema),
            EventPayload::SchemaChange { schema, .. } => {
                if !self.schema_allowed(schema) || self.config.only_data_mutations() {
                    FilterDecision::Drop
                } else {
                    FilterDecision::Keep
                }
            }
            EventPayload::TableDefinition { schema, table, .. } => {
                if self.schema_allowed(schema) && self.table_allowed(schema, table) {
                    FilterDecision::Keep
                } else {
                    FilterDecision::Drop
                }
            }
            EventPayload::TransactionIdentity { .. }
            | EventPayload::TransactionCommit { .. }
            | EventPayload::RowInsert(_)
            | EventPayload::RowUpdate(_)
            | EventPayload::RowDelete(_) => FilterDecision::Keep,
        }
    }

    fn rows_decision(
        &self,
        sql_type: SqlType,
        rows: &RowsPayload,
        resolver: &TableMetadataResolver,
    ) -> FilterDecision {
        if !self.sql_types.contains(&sql_type) {
            return FilterDecision::Drop;
        }

        let bound = resolver.lookup(rows.table_id);
        let schema = rows
            .schema
            .as_deref()
            .or_else(|| bound.as_deref().map(|m| m.schema.as_str()));
        let table = rows
            .table
            .as_deref()
            .or_else(|| bound.as_deref().map(|m| m.table.as_str()));

        match (schema, table) {
            (Some(schema), Some(table)) => {
                if self.schema_allowed(schema) && self.table_allowed(schema, table) {
                    FilterDecision::Keep
                } else {
                    FilterDecision::Drop
                }
            }
            // Unknown table: let synthesis report the unresolved reference
            _ => FilterDecision::Keep,
        }
    }

    fn schema_decision(&self, schema: &str) -> FilterDecision {
        if self.schema_allowed(schema) {
            FilterDecision::Keep
        } else {
            FilterDecision::Drop
        }
    }

    fn schema_allowed(&self, schema: &str) -> bool {
        match &self.config.database {
            Some(database) => database == schema,
            None => true,
        }
    }

    /// Check a table against the allow-list (`table` or `schema.table`).
    pub fn table_allowed(&self, schema: &str, table: &str) -> bool {
        if self.table_patterns.is_empty() {
            return true;
        }
        let full_name = format!("{}.{}", schema, table);
        self.table_patterns
            .iter()
            .any(|p| p.is_match(table) || p.is_match(&full_name))
    }
}

fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&EventFilter::glob_to_regex_pattern(pattern))
}
