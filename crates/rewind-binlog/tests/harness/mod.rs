//! Test harness for flashback integration tests
//!
//! - Byte-accurate binlog file generation ([`BinlogBuilder`])
//! - Script reading helpers
//! - Idempotent test logging

#![allow(dead_code)]

pub mod binlog;

pub use binlog::{BinlogBuilder, Cell, Column, Span};

use std::path::Path;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rewind_binlog=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Server UUID used for GTID events.
pub const SERVER_UUID: [u8; 16] = [
    0x3e, 0x11, 0xfa, 0x47, 0x71, 0xca, 0x11, 0xe1, 0x9e, 0x33, 0xc8, 0x0a, 0xa9, 0x42, 0x95, 0x62,
];

/// `uuid:gno` text of a [`SERVER_UUID`] transaction.
pub fn gtid_text(gno: u64) -> String {
    format!("3e11fa47-71ca-11e1-9e33-c80aa9429562:{}", gno)
}

/// Lines of a generated script.
pub async fn script_lines(path: &Path) -> Vec<String> {
    tokio::fs::read_to_string(path)
        .await
        .expect("read script")
        .lines()
        .map(String::from)
        .collect()
}

/// SQL part of a rendered line (everything before the provenance comment).
pub fn sql_of(line: &str) -> &str {
    line.split(" /* ").next().unwrap_or(line)
}

/// `(id, name)` row for the `shop.users` test table.
pub fn user(id: i32, name: &str) -> Vec<Cell> {
    vec![Cell::from(id), Cell::from(name)]
}

pub const USERS_TABLE_ID: u64 = 108;

pub fn users_columns() -> [Column; 2] {
    [Column::Int, Column::Varchar(64)]
}
