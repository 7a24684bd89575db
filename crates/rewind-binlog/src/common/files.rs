//! Ordered binlog file list
//!
//! Built once per run from the catalog's file listing. File ordering is by
//! listing position, never by comparing file names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::common::{FlashbackConfig, FlashbackError, Result};

/// A binlog file as reported by the source (`SHOW BINARY LOGS`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFileEntry {
    pub name: String,
    pub size: u64,
}

impl LogFileEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// A binlog file with its resolved path and sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub index: usize,
}

/// Binlog files in source order.
#[derive(Debug, Clone, Default)]
pub struct LogFileList {
    files: Vec<LogFile>,
    by_name: HashMap<String, usize>,
}

impl LogFileList {
    pub fn new(dir: impl AsRef<Path>, entries: impl IntoIterator<Item = LogFileEntry>) -> Self {
        let dir = dir.as_ref();
        let files: Vec<LogFile> = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| LogFile {
                path: dir.join(&entry.name),
                name: entry.name,
                size: entry.size,
                index,
            })
            .collect();
        let by_name = files
            .iter()
            .map(|f| (f.name.clone(), f.index))
            .collect();
        Self { files, by_name }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&LogFile> {
        self.index_of(name).map(|i| &self.files[i])
    }

    /// Sequence index of a file, `None` when the source does not list it.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Files from `name` (inclusive) to the end of the list.
    pub fn from_start(&self, name: &str) -> Result<&[LogFile]> {
        let index = self.index_of(name).ok_or_else(|| {
            FlashbackError::malformed_boundary(format!(
                "start file '{}' is not in the source's binlog list",
                name
            ))
        })?;
        Ok(&self.files[index..])
    }

    /// Check start and stop bounds against the listing.
    pub fn validate_boundaries(&self, config: &FlashbackConfig) -> Result<()> {
        let start_name = config.start_file_name();
        let start = self.get(start_name).ok_or_else(|| {
            FlashbackError::malformed_boundary(format!(
                "start file '{}' is not in the source's binlog list",
                start_name
            ))
        })?;
        if config.start_position > start.size {
            return Err(FlashbackError::malformed_boundary(format!(
                "start position {} exceeds size {} of '{}'",
                config.start_position, start.size, start.name
            )));
        }

        if let Some(stop_name) = config.stop_file_name() {
            let stop = self.get(stop_name).ok_or_else(|| {
                FlashbackError::malformed_boundary(format!(
                    "stop file '{}' is not in the source's binlog list",
                    stop_name
                ))
            })?;
            if config.stop_position > stop.size {
                return Err(FlashbackError::malformed_boundary(format!(
                    "stop position {} exceeds size {} of '{}'",
                    config.stop_position, stop.size, stop.name
                )));
            }
            if stop.index < start.index {
                return Err(FlashbackError::malformed_boundary(format!(
                    "stop file '{}' precedes start file '{}'",
                    stop.name, start.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> LogFileList {
        LogFileList::new(
            "/var/lib/mysql",
            vec![
                LogFileEntry::new("mysql-bin.000009", 1000),
                LogFileEntry::new("mysql-bin.000010", 2000),
                LogFileEntry::new("mysql-bin.000011", 500),
            ],
        )
    }

    #[test]
    fn test_index_and_path() {
        let files = list();
        assert_eq!(files.len(), 3);
        assert_eq!(files.index_of("mysql-bin.000010"), Some(1));
        assert_eq!(files.index_of("mysql-bin.000099"), None);
        let file = files.get("mysql-bin.000011").unwrap();
        assert_eq!(file.path, PathBuf::from("/var/lib/mysql/mysql-bin.000011"));
        assert_eq!(file.index, 2);
    }

    #[test]
    fn test_from_start() {
        let files = list();
        let tail = files.from_start("mysql-bin.000010").unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].name, "mysql-bin.000010");
        assert!(matches!(
            files.from_start("nope.000001"),
            Err(FlashbackError::MalformedBoundary(_))
        ));
    }

    #[test]
    fn test_validate_boundaries() {
        let files = list();
        let ok = FlashbackConfig::new("mysql-bin.000009").with_stop("mysql-bin.000011", 500);
        assert!(files.validate_boundaries(&ok).is_ok());

        let past_end = FlashbackConfig::new("mysql-bin.000009").with_stop("mysql-bin.000011", 501);
        assert!(matches!(
            files.validate_boundaries(&past_end),
            Err(FlashbackError::MalformedBoundary(_))
        ));

        let unknown_stop = FlashbackConfig::new("mysql-bin.000009").with_stop("mysql-bin.000012", 0);
        assert!(files.validate_boundaries(&unknown_stop).is_err());

        let unknown_start = FlashbackConfig::new("mysql-bin.000001");
        assert!(files.validate_boundaries(&unknown_start).is_err());

        let reversed = FlashbackConfig::new("mysql-bin.000011").with_stop("mysql-bin.000009", 0);
        assert!(files.validate_boundaries(&reversed).is_err());

        let start_past_end = FlashbackConfig::new("mysql-bin.000011").with_start_position(600);
        assert!(files.validate_boundaries(&start_past_end).is_err());
    }
}
