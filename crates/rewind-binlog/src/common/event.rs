//! Event and statement representation
//!
//! [`DecodedEvent`] is what a binlog decoder hands to the pipeline, one per
//! replication event. [`Statement`] is what the pipeline hands to the output
//! sequencer: a rendered, provenance-tagged line that is never mutated again.
//!
//! ## Row values
//!
//! Column values arrive as an explicit tagged variant ([`RowValue`]) chosen
//! by the decoder from the column type, so SQL formatting never has to guess
//! a value's kind.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::common::FlashbackError;

/// Layout used for provenance timestamps and time bounds.
pub const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    /// Binary or composite value that is not reconstructed (renders empty)
    Unsupported,
}

impl RowValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Render as a SQL literal.
    ///
    /// `Unsupported` renders as an empty string: binary and composite
    /// column types are not reconstructed.
    pub fn to_sql_literal(&self) -> String {
        match self {
            RowValue::Null => "NULL".to_string(),
            RowValue::Integer(v) => v.to_string(),
            RowValue::Float(v) => v.to_string(),
            RowValue::Boolean(v) => v.to_string(),
            RowValue::Text(v) => quote_text(v),
            RowValue::Unsupported => String::new(),
        }
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        RowValue::Integer(v)
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        RowValue::Text(v.to_string())
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        RowValue::Text(v)
    }
}

impl From<f64> for RowValue {
    fn from(v: f64) -> Self {
        RowValue::Float(v)
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        RowValue::Boolean(v)
    }
}

/// Single-quote a string literal, escaping so the result stays on one line.
fn quote_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Before/after images of one affected row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowImage {
    /// Row prior to the mutation (UPDATE/DELETE)
    pub before: Option<Vec<RowValue>>,
    /// Row following the mutation (INSERT/UPDATE)
    pub after: Option<Vec<RowValue>>,
}

impl RowImage {
    pub fn inserted(after: Vec<RowValue>) -> Self {
        Self {
            before: None,
            after: Some(after),
        }
    }

    pub fn updated(before: Vec<RowValue>, after: Vec<RowValue>) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn deleted(before: Vec<RowValue>) -> Self {
        Self {
            before: Some(before),
            after: None,
        }
    }
}

/// Payload of a row-mutation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowsPayload {
    /// Per-stream table identifier bound by a table-definition event
    pub table_id: u64,
    /// Schema name, when the decoder has seen the table map
    pub schema: Option<String>,
    /// Table name, when the decoder has seen the table map
    pub table: Option<String>,
    /// Affected rows in event order
    pub rows: Vec<RowImage>,
}

impl RowsPayload {
    pub fn new(table_id: u64, rows: Vec<RowImage>) -> Self {
        Self {
            table_id,
            schema: None,
            table: None,
            rows,
        }
    }

    /// Attach the schema/table names known to the decoder.
    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self.table = Some(table.into());
        self
    }
}

/// Kind-specific content of a decoded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// Transaction group marker; `gtid` is `None` for anonymous markers
    TransactionIdentity { gtid: Option<String> },
    /// `BEGIN` query opening a transaction
    TransactionBegin { schema: String },
    /// Transaction commit (`xid` is `None` for a `COMMIT` query)
    TransactionCommit { xid: Option<u64> },
    /// Any other statement text (DDL, non-transactional DML)
    SchemaChange { schema: String, query: String },
    /// Binds a per-stream table id to a schema/table name
    TableDefinition {
        table_id: u64,
        schema: String,
        table: String,
    },
    RowInsert(RowsPayload),
    RowUpdate(RowsPayload),
    RowDelete(RowsPayload),
}

/// Event kind discriminant, used for filter logging and the SQL-type allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TransactionIdentity,
    TransactionBegin,
    TransactionCommit,
    SchemaChange,
    TableDefinition,
    RowInsert,
    RowUpdate,
    RowDelete,
}

impl EventKind {
    /// SQL type of a row-mutation kind.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            EventKind::RowInsert => Some(SqlType::Insert),
            EventKind::RowUpdate => Some(SqlType::Update),
            EventKind::RowDelete => Some(SqlType::Delete),
            _ => None,
        }
    }
}

/// A replication event as produced by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Event timestamp (Unix epoch seconds)
    pub timestamp: u32,
    /// Absolute end offset of the event in its binlog file
    pub log_position: u64,
    /// Size of the event in bytes, header included
    pub event_size: u64,
    pub payload: EventPayload,
}

impl DecodedEvent {
    pub fn new(timestamp: u32, log_position: u64, event_size: u64, payload: EventPayload) -> Self {
        Self {
            timestamp,
            log_position,
            event_size,
            payload,
        }
    }

    /// Absolute start offset of the event.
    pub fn start_position(&self) -> u64 {
        self.log_position.saturating_sub(self.event_size)
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::TransactionIdentity { .. } => EventKind::TransactionIdentity,
            EventPayload::TransactionBegin { .. } => EventKind::TransactionBegin,
            EventPayload::TransactionCommit { .. } => EventKind::TransactionCommit,
            EventPayload::SchemaChange { .. } => EventKind::SchemaChange,
            EventPayload::TableDefinition { .. } => EventKind::TableDefinition,
            EventPayload::RowInsert(_) => EventKind::RowInsert,
            EventPayload::RowUpdate(_) => EventKind::RowUpdate,
            EventPayload::RowDelete(_) => EventKind::RowDelete,
        }
    }

    /// Row payload of a row-mutation event.
    pub fn rows(&self) -> Option<&RowsPayload> {
        match &self.payload {
            EventPayload::RowInsert(rows)
            | EventPayload::RowUpdate(rows)
            | EventPayload::RowDelete(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Data-mutation statement type, as named in the SQL-type allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlType {
    Insert,
    Update,
    Delete,
}

impl SqlType {
    pub const ALL: [SqlType; 3] = [SqlType::Insert, SqlType::Update, SqlType::Delete];
}

impl FromStr for SqlType {
    type Err = FlashbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(SqlType::Insert),
            "UPDATE" => Ok(SqlType::Update),
            "DELETE" => Ok(SqlType::Delete),
            other => Err(FlashbackError::config(format!(
                "unknown SQL type '{}', expected INSERT, UPDATE or DELETE",
                other
            ))),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Insert => write!(f, "INSERT"),
            SqlType::Update => write!(f, "UPDATE"),
            SqlType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Which provenance comment a statement carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Row,
    Ddl,
    Gtid,
    Begin,
    Commit,
}

/// An emission-ready output record with full provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    /// SQL text (rows, DDL) or marker description (GTID, BEGIN, COMMIT)
    pub text: String,
    pub source_file: String,
    pub start_offset: u64,
    pub end_offset: u64,
    /// Event timestamp (Unix epoch seconds)
    pub timestamp: u32,
}

impl Statement {
    /// Render as one output line, without the trailing line delimiter.
    pub fn render(&self) -> String {
        let time = format_timestamp(self.timestamp);
        let (file, start, end) = (&self.source_file, self.start_offset, self.end_offset);
        match self.kind {
            StatementKind::Row => format!(
                "{} /* ROW -> binlog: {} | pos: ({}, {}) | time: {} */",
                self.text, file, start, end, time
            ),
            StatementKind::Ddl => format!(
                "{} /* DDL -> binlog: {} | pos: ({}, {}) | time: {} */",
                single_line(&self.text),
                file,
                start,
                end,
                time
            ),
            StatementKind::Gtid => format!(
                "/* GTID -> {} | binlog: {} | pos: ({}, {}) | time: {} */",
                self.text, file, start, end, time
            ),
            StatementKind::Begin => format!(
                "/* BEGIN -> {} | binlog: {} | pos: ({}, {}) | time: {} */",
                self.text, file, start, end, time
            ),
            StatementKind::Commit => format!(
                "/* COMMIT -> {} | binlog: {} | pos: ({}, {}) | time: {} */",
                self.text, file, start, end, time
            ),
        }
    }
}

/// Fold line breaks so a statement occupies exactly one output line.
fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format an epoch timestamp as local `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(timestamp: u32) -> String {
    match Local.timestamp_opt(i64::from(timestamp), 0).single() {
        Some(dt) => dt.format(TIME_LAYOUT).to_string(),
        None => timestamp.to_string(),
    }
}
