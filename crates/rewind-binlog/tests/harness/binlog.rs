//! Binlog file builder
//!
//! Produces byte-accurate MySQL 8.0 binlog files (CRC32 checksums on, row
//! events v2) and records the start/end offset of every event written.

use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = [0xfe, b'b', b'i', b'n'];
const HEADER_SIZE: usize = 19;

const QUERY_EVENT: u8 = 2;
const ROTATE_EVENT: u8 = 4;
const FORMAT_DESCRIPTION_EVENT: u8 = 15;
const XID_EVENT: u8 = 16;
const TABLE_MAP_EVENT: u8 = 19;
const WRITE_ROWS_EVENT_V2: u8 = 30;
const UPDATE_ROWS_EVENT_V2: u8 = 31;
const DELETE_ROWS_EVENT_V2: u8 = 32;
const GTID_LOG_EVENT: u8 = 33;
const ANONYMOUS_GTID_LOG_EVENT: u8 = 34;

const TYPE_LONG: u8 = 3;
const TYPE_VARCHAR: u8 = 15;

/// Column definition of a test table.
#[derive(Debug, Clone, Copy)]
pub enum Column {
    Int,
    Varchar(u16),
}

/// Cell value in a test row.
#[derive(Debug, Clone)]
pub enum Cell {
    Int(i32),
    Str(String),
    Null,
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Str(v.to_string())
    }
}

/// Start and end offsets of a written event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

/// In-memory binlog file under construction.
pub struct BinlogBuilder {
    data: Vec<u8>,
    timestamp: u32,
    tables: Vec<(u64, Vec<Column>)>,
}

impl Default for BinlogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BinlogBuilder {
    /// Magic plus a format description announcing CRC32 checksums.
    pub fn new() -> Self {
        let mut builder = Self {
            data: MAGIC.to_vec(),
            timestamp: 1_700_000_000,
            tables: Vec::new(),
        };
        let mut p = Vec::new();
        p.extend_from_slice(&4u16.to_le_bytes());
        let mut version = [0u8; 50];
        let server = b"8.0.35-log";
        version[..server.len()].copy_from_slice(server);
        p.extend_from_slice(&version);
        p.extend_from_slice(&0u32.to_le_bytes());
        p.push(HEADER_SIZE as u8);
        p.extend_from_slice(&[0u8; 40]);
        p.push(1);
        builder.push(FORMAT_DESCRIPTION_EVENT, &p);
        builder
    }

    pub fn at_time(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Current file length (offset of the next event).
    pub fn position(&self) -> u64 {
        self.data.len() as u64
    }

    fn push(&mut self, event_type: u8, payload: &[u8]) -> Span {
        let start = self.position();
        let length = (HEADER_SIZE + payload.len() + 4) as u32;
        let end = start + u64::from(length);

        self.data.extend_from_slice(&self.timestamp.to_le_bytes());
        self.data.push(event_type);
        self.data.extend_from_slice(&1u32.to_le_bytes());
        self.data.extend_from_slice(&length.to_le_bytes());
        self.data.extend_from_slice(&(end as u32).to_le_bytes());
        self.data.extend_from_slice(&0u16.to_le_bytes());
        self.data.extend_from_slice(payload);
        // checksum is not verified by the reader
        self.data.extend_from_slice(&[0xc5, 0xc5, 0xc5, 0xc5]);
        Span { start, end }
    }

    pub fn gtid(&mut self, uuid: [u8; 16], gno: u64) -> Span {
        let mut p = vec![1u8];
        p.extend_from_slice(&uuid);
        p.extend_from_slice(&gno.to_le_bytes());
        p.extend_from_slice(&[0u8; 17]);
        self.push(GTID_LOG_EVENT, &p)
    }

    pub fn anonymous_gtid(&mut self) -> Span {
        let mut p = vec![1u8];
        p.extend_from_slice(&[0u8; 24]);
        p.extend_from_slice(&[0u8; 17]);
        self.push(ANONYMOUS_GTID_LOG_EVENT, &p)
    }

    pub fn query(&mut self, schema: &str, query: &str) -> Span {
        let mut p = Vec::new();
        p.extend_from_slice(&11u32.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        p.push(schema.len() as u8);
        p.extend_from_slice(&0u16.to_le_bytes());
        // flags2 status variable
        p.extend_from_slice(&5u16.to_le_bytes());
        p.extend_from_slice(&[0, 0, 0, 0, 0]);
        p.extend_from_slice(schema.as_bytes());
        p.push(0);
        p.extend_from_slice(query.as_bytes());
        self.push(QUERY_EVENT, &p)
    }

    pub fn begin(&mut self, schema: &str) -> Span {
        self.query(schema, "BEGIN")
    }

    pub fn table_map(&mut self, table_id: u64, schema: &str, table: &str, columns: &[Column]) -> Span {
        let mut p = Vec::new();
        p.extend_from_slice(&table_id.to_le_bytes()[..6]);
        p.extend_from_slice(&1u16.to_le_bytes());
        p.push(schema.len() as u8);
        p.extend_from_slice(schema.as_bytes());
        p.push(0);
        p.push(table.len() as u8);
        p.extend_from_slice(table.as_bytes());
        p.push(0);
        p.push(columns.len() as u8);
        let mut metadata = Vec::new();
        for column in columns {
            match column {
                Column::Int => p.push(TYPE_LONG),
                Column::Varchar(max) => {
                    p.push(TYPE_VARCHAR);
                    metadata.extend_from_slice(&max.to_le_bytes());
                }
            }
        }
        p.push(metadata.len() as u8);
        p.extend_from_slice(&metadata);
        p.extend_from_slice(&vec![0xffu8; columns.len().div_ceil(8)]);

        self.tables.retain(|(id, _)| *id != table_id);
        self.tables.push((table_id, columns.to_vec()));
        self.push(TABLE_MAP_EVENT, &p)
    }

    fn columns_of(&self, table_id: u64) -> Vec<Column> {
        self.tables
            .iter()
            .find(|(id, _)| *id == table_id)
            .map(|(_, columns)| columns.clone())
            .expect("table map written before rows")
    }

    fn rows_header(table_id: u64, column_count: usize, images: usize) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&table_id.to_le_bytes()[..6]);
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&2u16.to_le_bytes());
        p.push(column_count as u8);
        for _ in 0..images {
            p.extend_from_slice(&vec![0xffu8; column_count.div_ceil(8)]);
        }
        p
    }

    fn encode_row(columns: &[Column], cells: &[Cell]) -> Vec<u8> {
        let mut null_bitmap = vec![0u8; columns.len().div_ceil(8)];
        let mut values = Vec::new();
        for (idx, (column, cell)) in columns.iter().zip(cells).enumerate() {
            match (column, cell) {
                (_, Cell::Null) => null_bitmap[idx / 8] |= 1 << (idx % 8),
                (Column::Int, Cell::Int(v)) => values.extend_from_slice(&v.to_le_bytes()),
                (Column::Varchar(max), Cell::Str(s)) => {
                    if *max < 256 {
                        values.push(s.len() as u8);
                    } else {
                        values.extend_from_slice(&(s.len() as u16).to_le_bytes());
                    }
                    values.extend_from_slice(s.as_bytes());
                }
                (column, cell) => panic!("cell {:?} does not fit column {:?}", cell, column),
            }
        }
        null_bitmap.extend_from_slice(&values);
        null_bitmap
    }

    pub fn write_rows(&mut self, table_id: u64, rows: &[Vec<Cell>]) -> Span {
        let columns = self.columns_of(table_id);
        let mut p = Self::rows_header(table_id, columns.len(), 1);
        for row in rows {
            p.extend_from_slice(&Self::encode_row(&columns, row));
        }
        self.push(WRITE_ROWS_EVENT_V2, &p)
    }

    pub fn update_rows(&mut self, table_id: u64, rows: &[(Vec<Cell>, Vec<Cell>)]) -> Span {
        let columns = self.columns_of(table_id);
        let mut p = Self::rows_header(table_id, columns.len(), 2);
        for (before, after) in rows {
            p.extend_from_slice(&Self::encode_row(&columns, before));
            p.extend_from_slice(&Self::encode_row(&columns, after));
        }
        self.push(UPDATE_ROWS_EVENT_V2, &p)
    }

    pub fn delete_rows(&mut self, table_id: u64, rows: &[Vec<Cell>]) -> Span {
        let columns = self.columns_of(table_id);
        let mut p = Self::rows_header(table_id, columns.len(), 1);
        for row in rows {
            p.extend_from_slice(&Self::encode_row(&columns, row));
        }
        self.push(DELETE_ROWS_EVENT_V2, &p)
    }

    pub fn xid(&mut self, xid: u64) -> Span {
        self.push(XID_EVENT, &xid.to_le_bytes())
    }

    pub fn rotate(&mut self, next_file: &str) -> Span {
        let mut p = 4u64.to_le_bytes().to_vec();
        p.extend_from_slice(next_file.as_bytes());
        self.push(ROTATE_EVENT, &p)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Drop the last `n` bytes, as if the file were still being written.
    pub fn truncate_tail(&mut self, n: usize) {
        let len = self.data.len().saturating_sub(n);
        self.data.truncate(len);
    }

    /// Write the file into `dir`; returns its path and size.
    pub async fn write_to(&self, dir: &Path, name: &str) -> (PathBuf, u64) {
        let path = dir.join(name);
        tokio::fs::write(&path, &self.data)
            .await
            .expect("write binlog file");
        (path, self.data.len() as u64)
    }
}
