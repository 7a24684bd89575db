//! MySQL binlog decoding and live catalog
//!
//! Supports:
//! - MySQL 5.6+, 8.0+ and MariaDB 10.x binlog files
//! - Row-based logging (binlog_format=ROW, binlog_row_image=FULL)
//! - CRC32 event checksums
//! - GTID and anonymous transaction markers
//!
//! # Architecture
//!
//! ```text
//! binlog file → BinlogFileReader → BinlogDecoder → DecodedEvent
//! MySQL       → MySqlCatalog (INFORMATION_SCHEMA, SHOW BINARY LOGS)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use rewind_binlog::mysql::{ConnectionOptions, MySqlCatalog};
//! use rewind_binlog::SchemaCatalog;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let catalog = MySqlCatalog::connect(
//!     ConnectionOptions::new("localhost", "root")
//!         .with_password("password")
//!         .with_port(3306),
//! )
//! .await?;
//! let files = catalog.list_log_files().await?;
//! println!("{} binlog files", files.len());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod decoder;
pub mod reader;

pub use catalog::*;
pub use decoder::*;
pub use reader::*;
