//! Error types for flashback runs
//!
//! Every variant is fatal for the run that raised it. Early termination
//! requested by the event filter is not an error and never appears here;
//! see [`FilterDecision::Stop`](crate::common::FilterDecision::Stop).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for logging and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Source database errors (connection, catalog query)
    Database,
    /// Table metadata errors (column lookup, arity, unresolved ids)
    Schema,
    /// Configuration and boundary errors
    Configuration,
    /// Binlog decoding errors
    Replication,
    /// Local file and sink errors
    Io,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Process exit code reported by the command line front-end.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorCategory::Other => 1,
            ErrorCategory::Configuration => 2,
            ErrorCategory::Database => 3,
            ErrorCategory::Schema => 4,
            ErrorCategory::Replication => 5,
            ErrorCategory::Io => 6,
        }
    }
}

/// Flashback-specific errors
#[derive(Error, Debug)]
pub enum FlashbackError {
    /// Could not reach the source database
    #[error("Connection error: {0}")]
    Connection(String),

    /// A catalog query failed after the connection was established
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Column names for a table could not be resolved
    #[error("Schema lookup failed for `{schema}`.`{table}`: {reason}")]
    SchemaLookup {
        schema: String,
        table: String,
        reason: String,
    },

    /// A row event references a table id with no table definition in this run
    #[error("Unresolved table reference: table_id={table_id} was never defined in this run")]
    UnresolvedTableReference { table_id: u64 },

    /// Row tuple length disagrees with the cached column count
    #[error(
        "Arity mismatch for `{schema}`.`{table}`: table has {expected} columns, row image has {actual}"
    )]
    ArityMismatch {
        schema: String,
        table: String,
        expected: usize,
        actual: usize,
    },

    /// Requested start/stop boundary does not exist on the source
    #[error("Malformed boundary: {0}")]
    MalformedBoundary(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Binlog decoding error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Output sink error
    #[error("Output error: {0}")]
    Output(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlashbackError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a schema lookup error
    pub fn schema_lookup(
        schema: impl Into<String>,
        table: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaLookup {
            schema: schema.into(),
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed boundary error
    pub fn malformed_boundary(msg: impl Into<String>) -> Self {
        Self::MalformedBoundary(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an output error
    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) | Self::Catalog(_) => ErrorCategory::Database,
            Self::SchemaLookup { .. }
            | Self::UnresolvedTableReference { .. }
            | Self::ArityMismatch { .. } => ErrorCategory::Schema,
            Self::MalformedBoundary(_) | Self::Config(_) => ErrorCategory::Configuration,
            Self::Decode(_) => ErrorCategory::Replication,
            Self::Output(_) | Self::Io(_) => ErrorCategory::Io,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::Catalog(_) => "catalog_error",
            Self::SchemaLookup { .. } => "schema_lookup_error",
            Self::UnresolvedTableReference { .. } => "unresolved_table_reference",
            Self::ArityMismatch { .. } => "arity_mismatch",
            Self::MalformedBoundary(_) => "malformed_boundary",
            Self::Config(_) => "config_error",
            Self::Decode(_) => "decode_error",
            Self::Output(_) => "output_error",
            Self::Io(_) => "io_error",
        }
    }
}

/// Result type for flashback operations
pub type Result<T> = std::result::Result<T, FlashbackError>;
