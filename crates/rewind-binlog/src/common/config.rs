//! Run configuration
//!
//! [`FlashbackConfig`] is built once (usually by the CLI) and shared
//! read-only with every component of a run.
//!
//! # Example
//!
//! ```rust
//! use rewind_binlog::{FlashbackConfig, OutputTarget};
//!
//! let config = FlashbackConfig::new("mysql-bin.000012")
//!     .with_start_position(219)
//!     .with_stop("mysql-bin.000013", 4096)
//!     .with_database("shop")
//!     .with_rollback(true)
//!     .with_output(OutputTarget::file("undo.sql"));
//!
//! assert!(config.validate().is_ok());
//! assert!(config.suppress_transaction_markers());
//! ```

use chrono::{Local, NaiveDateTime, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::common::{FlashbackError, Result, SqlType, TIME_LAYOUT};

/// Smallest valid event offset: the 4-byte magic precedes the first event.
pub const BINLOG_FIRST_EVENT_OFFSET: u64 = 4;

/// Where emitted statements go.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    /// Standard output
    #[default]
    Console,
    /// A named file (truncated on open)
    File(PathBuf),
}

impl OutputTarget {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        OutputTarget::File(path.into())
    }

    pub fn is_console(&self) -> bool {
        matches!(self, OutputTarget::Console)
    }
}

impl FromStr for OutputTarget {
    type Err = FlashbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "stdout" | "-" => Ok(OutputTarget::Console),
            path => Ok(OutputTarget::File(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Console => write!(f, "stdout"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Immutable configuration for one flashback run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashbackConfig {
    /// First binlog file to read; may carry a directory component
    pub start_file: String,
    /// Offset in the start file; values below 4 mean "from the first event"
    #[serde(default)]
    pub start_position: u64,
    /// Lower time bound (Unix epoch seconds)
    #[serde(default)]
    pub start_time: Option<i64>,
    /// Last binlog file to read
    #[serde(default)]
    pub stop_file: Option<String>,
    /// Offset in the stop file; 0 means "to the end of the file"
    #[serde(default)]
    pub stop_position: u64,
    /// Upper time bound (Unix epoch seconds)
    #[serde(default)]
    pub stop_time: Option<i64>,
    /// Regex matched against `uuid:gno` of GTID markers
    #[serde(default)]
    pub gtid_pattern: Option<String>,
    /// Only events from this schema are kept
    #[serde(default)]
    pub database: Option<String>,
    /// Table allow-list (`table`, `schema.table`, `*` globs); empty allows all
    #[serde(default)]
    pub only_tables: Vec<String>,
    /// Row-mutation SQL types to keep
    #[serde(default = "default_sql_types")]
    pub only_sql_types: Vec<SqlType>,
    /// Drop schema changes and other non-row statements
    #[serde(default = "default_true")]
    pub only_dml: bool,
    /// Omit GTID/BEGIN/COMMIT markers from the output
    #[serde(default)]
    pub no_transaction_markers: bool,
    /// Directory holding the binlog files, when not derivable elsewhere
    #[serde(default)]
    pub binlog_dir: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputTarget,
    /// Synthesize inverted statements in reverse order
    #[serde(default)]
    pub rollback: bool,
}

fn default_sql_types() -> Vec<SqlType> {
    SqlType::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

impl FlashbackConfig {
    pub fn new(start_file: impl Into<String>) -> Self {
        Self {
            start_file: start_file.into(),
            start_position: 0,
            start_time: None,
            stop_file: None,
            stop_position: 0,
            stop_time: None,
            gtid_pattern: None,
            database: None,
            only_tables: Vec::new(),
            only_sql_types: default_sql_types(),
            only_dml: true,
            no_transaction_markers: false,
            binlog_dir: None,
            output: OutputTarget::Console,
            rollback: false,
        }
    }

    pub fn with_start_position(mut self, position: u64) -> Self {
        self.start_position = position;
        self
    }

    pub fn with_start_time(mut self, epoch_seconds: i64) -> Self {
        self.start_time = Some(epoch_seconds);
        self
    }

    /// Set the stop file and offset (0 reads the stop file to its end).
    pub fn with_stop(mut self, file: impl Into<String>, position: u64) -> Self {
        self.stop_file = Some(file.into());
        self.stop_position = position;
        self
    }

    pub fn with_stop_time(mut self, epoch_seconds: i64) -> Self {
        self.stop_time = Some(epoch_seconds);
        self
    }

    pub fn with_gtid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.gtid_pattern = Some(pattern.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn include_table(mut self, pattern: impl Into<String>) -> Self {
        self.only_tables.push(pattern.into());
        self
    }

    pub fn with_sql_types(mut self, types: impl IntoIterator<Item = SqlType>) -> Self {
        self.only_sql_types = types.into_iter().collect();
        self
    }

    pub fn with_only_dml(mut self, only_dml: bool) -> Self {
        self.only_dml = only_dml;
        self
    }

    pub fn with_no_transaction_markers(mut self, suppress: bool) -> Self {
        self.no_transaction_markers = suppress;
        self
    }

    pub fn with_binlog_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binlog_dir = Some(dir.into());
        self
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Whether non-row statements are dropped. Always true in rollback mode.
    pub fn only_data_mutations(&self) -> bool {
        self.only_dml || self.rollback
    }

    /// Whether transaction markers are omitted. Always true in rollback mode.
    pub fn suppress_transaction_markers(&self) -> bool {
        self.no_transaction_markers || self.rollback
    }

    /// File name of the start file, without any directory component.
    pub fn start_file_name(&self) -> &str {
        file_name_of(&self.start_file)
    }

    /// File name of the stop file, without any directory component.
    pub fn stop_file_name(&self) -> Option<&str> {
        self.stop_file.as_deref().map(file_name_of)
    }

    /// Directory component of the start file, if one was given.
    pub fn start_file_dir(&self) -> Option<&Path> {
        Path::new(&self.start_file)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Offset the start file is opened at.
    pub fn effective_start_position(&self) -> u64 {
        self.start_position.max(BINLOG_FIRST_EVENT_OFFSET)
    }

    /// Whether the run reads a single file.
    pub fn is_single_file(&self) -> bool {
        self.stop_file_name() == Some(self.start_file_name())
    }

    /// Compile the GTID pattern, if any.
    pub fn compiled_gtid_pattern(&self) -> Result<Option<Regex>> {
        self.gtid_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| FlashbackError::config(format!("invalid GTID pattern: {}", e)))
            })
            .transpose()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.start_file.trim().is_empty() {
            return Err(FlashbackError::config("start file is required"));
        }
        if !has_sequence_extension(self.start_file_name()) {
            return Err(FlashbackError::config(format!(
                "start file '{}' must look like mysql-bin.000001",
                self.start_file
            )));
        }
        if let Some(stop) = self.stop_file_name() {
            if !has_sequence_extension(stop) {
                return Err(FlashbackError::config(format!(
                    "stop file '{}' must look like mysql-bin.000001",
                    stop
                )));
            }
        }
        if self.stop_position > 0 && self.stop_file.is_none() {
            return Err(FlashbackError::config(
                "a stop position requires a stop file",
            ));
        }
        if let (Some(start), Some(stop)) = (self.start_time, self.stop_time) {
            if start > stop {
                return Err(FlashbackError::config(
                    "start time must not be after stop time",
                ));
            }
        }
        if self.only_sql_types.is_empty() {
            return Err(FlashbackError::config(
                "at least one SQL type must be selected",
            ));
        }
        self.compiled_gtid_pattern()?;
        Ok(())
    }
}

fn file_name_of(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

/// Binlog files are named `<base>.<sequence>` with a numeric sequence.
pub fn has_sequence_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((base, seq)) => {
            !base.is_empty() && !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Parse a `YYYY-MM-DD HH:MM:SS` local time into epoch seconds.
pub fn parse_local_time(value: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), TIME_LAYOUT).map_err(|e| {
        FlashbackError::config(format!(
            "invalid time '{}' (expected YYYY-MM-DD HH:MM:SS): {}",
            value, e
        ))
    })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| FlashbackError::config(format!("time '{}' does not exist locally", value)))
}

/// Parse a comma separated list, trimming entries and skipping empties.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlashbackConfig::new("mysql-bin.000001");
        assert!(config.only_data_mutations());
        assert!(!config.suppress_transaction_markers());
        assert_eq!(config.only_sql_types, SqlType::ALL.to_vec());
        assert_eq!(config.effective_start_position(), 4);
        assert!(config.output.is_console());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rollback_forces_flags() {
        let config = FlashbackConfig::new("mysql-bin.000001")
            .with_only_dml(false)
            .with_no_transaction_markers(false)
            .with_rollback(true);
        assert!(config.only_data_mutations());
        assert!(config.suppress_transaction_markers());

        let forward = config.clone().with_rollback(false);
        assert!(!forward.only_data_mutations());
        assert!(!forward.suppress_transaction_markers());
    }

    #[test]
    fn test_validate_file_names() {
        assert!(FlashbackConfig::new("").validate().is_err());
        assert!(FlashbackConfig::new("mysql-bin").validate().is_err());
        assert!(FlashbackConfig::new("mysql-bin.abc").validate().is_err());
        assert!(FlashbackConfig::new("/var/lib/mysql/mysql-bin.000007")
            .validate()
            .is_ok());
        assert!(FlashbackConfig::new("mysql-bin.000001")
            .with_stop("bad", 0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_stop_position_needs_file() {
        let mut config = FlashbackConfig::new("mysql-bin.000001");
        config.stop_position = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stop file"));
    }

    #[test]
    fn test_validate_time_order() {
        let config = FlashbackConfig::new("mysql-bin.000001")
            .with_start_time(200)
            .with_stop_time(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_gtid_pattern() {
        let config = FlashbackConfig::new("mysql-bin.000001").with_gtid_pattern("([");
        assert!(matches!(config.validate(), Err(FlashbackError::Config(_))));

        let config = FlashbackConfig::new("mysql-bin.000001").with_gtid_pattern(":1[0-9]$");
        assert!(config.compiled_gtid_pattern().unwrap().is_some());
    }

    #[test]
    fn test_file_name_parts() {
        let config = FlashbackConfig::new("/data/binlog/mysql-bin.000003")
            .with_stop("mysql-bin.000003", 900);
        assert_eq!(config.start_file_name(), "mysql-bin.000003");
        assert_eq!(config.start_file_dir(), Some(Path::new("/data/binlog")));
        assert!(config.is_single_file());

        let bare = FlashbackConfig::new("mysql-bin.000003");
        assert_eq!(bare.start_file_dir(), None);
        assert!(!bare.is_single_file());
    }

    #[test]
    fn test_output_target_from_str() {
        assert_eq!("stdout".parse::<OutputTarget>().unwrap(), OutputTarget::Console);
        assert_eq!("".parse::<OutputTarget>().unwrap(), OutputTarget::Console);
        assert_eq!(
            "out/undo.sql".parse::<OutputTarget>().unwrap(),
            OutputTarget::file("out/undo.sql")
        );
    }

    #[test]
    fn test_parse_local_time() {
        let a = parse_local_time("2024-03-01 10:00:00").unwrap();
        let b = parse_local_time("2024-03-01 10:00:05").unwrap();
        assert_eq!(b - a, 5);
        assert!(parse_local_time("2024/03/01 10:00").is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_serde_defaults() {
        let config: FlashbackConfig =
            serde_json::from_str(r#"{"start_file":"mysql-bin.000001"}"#).unwrap();
        assert!(config.only_dml);
        assert_eq!(config.only_sql_types.len(), 3);
        assert_eq!(config.output, OutputTarget::Console);
    }
}
