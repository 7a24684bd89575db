//! MySQL binlog event decoder
//!
//! Decodes MySQL binary log events into [`EventPayload`]s:
//! - FORMAT_DESCRIPTION_EVENT (checksum detection, internal)
//! - TABLE_MAP_EVENT
//! - WRITE_ROWS_EVENT (v1 and v2)
//! - UPDATE_ROWS_EVENT (v1 and v2)
//! - DELETE_ROWS_EVENT (v1 and v2)
//! - QUERY_EVENT
//! - XID_EVENT (transaction commit)
//! - GTID_LOG_EVENT / ANONYMOUS_GTID_LOG_EVENT
//! - ROTATE_EVENT, PREVIOUS_GTIDS_LOG_EVENT, HEARTBEAT (internal)
//!
//! Column values decode straight into [`RowValue`]. Binary strings that are
//! not UTF-8, JSON and geometry values become [`RowValue::Unsupported`].

use bytes::Buf;
use chrono::{Local, TimeZone};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::common::{
    EventPayload, FlashbackError, Result, RowImage, RowValue, RowsPayload, TIME_LAYOUT,
};

/// Binlog event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Query,
    Stop,
    Rotate,
    FormatDescription,
    Xid,
    TableMap,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Heartbeat,
    RowsQuery,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    Unknown(u8),
}

impl EventType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => EventType::Query,
            3 => EventType::Stop,
            4 => EventType::Rotate,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            19 => EventType::TableMap,
            23 => EventType::WriteRowsV1,
            24 => EventType::UpdateRowsV1,
            25 => EventType::DeleteRowsV1,
            27 => EventType::Heartbeat,
            29 => EventType::RowsQuery,
            30 => EventType::WriteRowsV2,
            31 => EventType::UpdateRowsV2,
            32 => EventType::DeleteRowsV2,
            33 => EventType::Gtid,
            34 => EventType::AnonymousGtid,
            35 => EventType::PreviousGtids,
            other => EventType::Unknown(other),
        }
    }

    pub fn is_row_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV1
                | EventType::WriteRowsV2
                | EventType::UpdateRowsV1
                | EventType::UpdateRowsV2
                | EventType::DeleteRowsV1
                | EventType::DeleteRowsV2
        )
    }

    fn is_rows_v2(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV2 | EventType::UpdateRowsV2 | EventType::DeleteRowsV2
        )
    }
}

/// MySQL column types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            _ => return None,
        })
    }
}

/// Bounds-checked reader over an event payload.
pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(FlashbackError::decode(format!(
                "truncated {}: need {} bytes, {} left",
                what,
                needed,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.ensure(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16_le(&mut self) -> Result<u16> {
        self.ensure(2, "u16")?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32> {
        self.ensure(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn u64_le(&mut self) -> Result<u64> {
        self.ensure(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    fn f32_le(&mut self) -> Result<f32> {
        self.ensure(4, "float")?;
        Ok(self.buf.get_f32_le())
    }

    fn f64_le(&mut self) -> Result<f64> {
        self.ensure(8, "double")?;
        Ok(self.buf.get_f64_le())
    }

    /// Little-endian unsigned integer of `n` (<= 8) bytes.
    fn uint_le(&mut self, n: usize) -> Result<u64> {
        self.ensure(n, "integer")?;
        Ok(self.buf.get_uint_le(n))
    }

    /// Big-endian unsigned integer of `n` (<= 8) bytes.
    fn uint_be(&mut self, n: usize) -> Result<u64> {
        self.ensure(n, "integer")?;
        Ok(self.buf.get_uint(n))
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n, "byte string")?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    /// Length-encoded integer.
    fn packed_int(&mut self) -> Result<u64> {
        match self.u8()? {
            first @ 0..=250 => Ok(u64::from(first)),
            252 => self.uint_le(2),
            253 => self.uint_le(3),
            254 => self.uint_le(8),
            other => Err(FlashbackError::decode(format!(
                "invalid packed integer prefix {}",
                other
            ))),
        }
    }
}

/// Binlog event header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: EventType,
    pub server_id: u32,
    pub event_length: u32,
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(FlashbackError::decode(format!(
                "event header too short: {} bytes",
                data.len()
            )));
        }
        let mut reader = PayloadReader::new(&data[..Self::SIZE]);
        Ok(Self {
            timestamp: reader.u32_le()?,
            event_type: EventType::from_u8(reader.u8()?),
            server_id: reader.u32_le()?,
            event_length: reader.u32_le()?,
            next_position: reader.u32_le()?,
            flags: reader.u16_le()?,
        })
    }
}

/// Format description event
#[derive(Debug, Clone)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_length: u8,
    pub checksum_type: u8,
}

/// Table map event - describes table structure
#[derive(Debug, Clone)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub schema_name: String,
    pub table_name: String,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
}

/// GTID event
#[derive(Debug, Clone)]
pub struct GtidEvent {
    pub flags: u8,
    pub uuid: [u8; 16],
    pub gno: u64,
}

impl GtidEvent {
    pub fn uuid_string(&self) -> String {
        let hex: Vec<String> = self.uuid.iter().map(|b| format!("{:02x}", b)).collect();
        format!(
            "{}-{}-{}-{}-{}",
            hex[0..4].concat(),
            hex[4..6].concat(),
            hex[6..8].concat(),
            hex[8..10].concat(),
            hex[10..16].concat()
        )
    }

    /// `uuid:gno` form.
    pub fn gtid_string(&self) -> String {
        format!("{}:{}", self.uuid_string(), self.gno)
    }
}

/// Binlog decoder with table cache
pub struct BinlogDecoder {
    /// Table map cache (table_id -> TableMapEvent)
    table_cache: HashMap<u64, TableMapEvent>,
    /// Format description for current binlog
    format: Option<FormatDescriptionEvent>,
}

impl Default for BinlogDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BinlogDecoder {
    pub fn new() -> Self {
        Self {
            table_cache: HashMap::new(),
            format: None,
        }
    }

    /// Whether events carry a CRC32 trailer.
    pub fn has_checksum(&self) -> bool {
        self.format
            .as_ref()
            .map(|f| f.checksum_type == 1)
            .unwrap_or(false)
    }

    pub fn format(&self) -> Option<&FormatDescriptionEvent> {
        self.format.as_ref()
    }

    /// Decode one raw event (header included).
    ///
    /// Returns `None` as payload for events that never reach the pipeline
    /// (format description, rotate, heartbeat, previous GTIDs, unknown).
    pub fn decode(&mut self, data: &[u8]) -> Result<(EventHeader, Option<EventPayload>)> {
        let header = EventHeader::parse(data)?;

        let has_checksum = if header.event_type == EventType::FormatDescription {
            Self::format_description_has_checksum(&data[EventHeader::SIZE..])
        } else {
            self.has_checksum()
        };
        let payload_end = if has_checksum && data.len() >= EventHeader::SIZE + 4 {
            data.len() - 4
        } else {
            data.len()
        };
        let payload = &data[EventHeader::SIZE..payload_end];

        trace!(
            "Decoding {:?} event, {} bytes total, {} bytes payload (checksum={})",
            header.event_type,
            data.len(),
            payload.len(),
            has_checksum
        );

        let decoded = match header.event_type {
            EventType::FormatDescription => {
                let event = self.decode_format_description(payload)?;
                self.format = Some(event);
                None
            }
            EventType::TableMap => {
                let event = self.decode_table_map(payload)?;
                let decoded = EventPayload::TableDefinition {
                    table_id: event.table_id,
                    schema: event.schema_name.clone(),
                    table: event.table_name.clone(),
                };
                self.table_cache.insert(event.table_id, event);
                Some(decoded)
            }
            EventType::WriteRowsV1 | EventType::WriteRowsV2 => Some(EventPayload::RowInsert(
                self.decode_rows_event(payload, header.event_type)?,
            )),
            EventType::UpdateRowsV1 | EventType::UpdateRowsV2 => Some(EventPayload::RowUpdate(
                self.decode_rows_event(payload, header.event_type)?,
            )),
            EventType::DeleteRowsV1 | EventType::DeleteRowsV2 => Some(EventPayload::RowDelete(
                self.decode_rows_event(payload, header.event_type)?,
            )),
            EventType::Xid => Some(EventPayload::TransactionCommit {
                xid: Some(PayloadReader::new(payload).u64_le()?),
            }),
            EventType::Query => Some(self.decode_query(payload)?),
            EventType::Gtid => Some(EventPayload::TransactionIdentity {
                gtid: Some(self.decode_gtid(payload)?.gtid_string()),
            }),
            EventType::AnonymousGtid => Some(EventPayload::TransactionIdentity { gtid: None }),
            EventType::Rotate
            | EventType::Heartbeat
            | EventType::PreviousGtids
            | EventType::RowsQuery
            | EventType::Stop => None,
            EventType::Unknown(code) => {
                debug!("Skipping unhandled event type {}", code);
                None
            }
        };
        Ok((header, decoded))
    }

    /// Detect a CRC32 trailer on a format description payload.
    ///
    /// Layout: `[binlog_version: 2] [server_version: 50] [create_timestamp: 4]
    /// [header_length: 1] [post_header_lengths: N] [checksum_alg: 1] [crc32: 4]?`.
    /// The checksum algorithm byte sits right before the CRC32 when present.
    fn format_description_has_checksum(payload: &[u8]) -> bool {
        // 57 fixed bytes + post-header lengths + alg + crc
        if payload.len() < 57 + 1 + 5 {
            return false;
        }
        let version = String::from_utf8_lossy(&payload[2..52]);
        let version = version.trim_end_matches('\0');
        Self::mysql_version_has_checksum(version) && payload[payload.len() - 5] == 1
    }

    fn decode_format_description(&self, data: &[u8]) -> Result<FormatDescriptionEvent> {
        let mut reader = PayloadReader::new(data);

        let binlog_version = reader.u16_le()?;
        let server_version = String::from_utf8_lossy(reader.bytes(50)?)
            .trim_end_matches('\0')
            .to_string();
        let create_timestamp = reader.u32_le()?;
        let header_length = reader.u8()?;

        // checksum_alg is the last byte once any CRC32 has been stripped
        let checksum_type = if Self::mysql_version_has_checksum(&server_version) {
            match data.last() {
                Some(&alg) if alg <= 1 => alg,
                _ => 0,
            }
        } else {
            0
        };

        debug!(
            "FDE: binlog_version={}, server={}, checksum_type={}",
            binlog_version, server_version, checksum_type
        );

        Ok(FormatDescriptionEvent {
            binlog_version,
            server_version,
            create_timestamp,
            header_length,
            checksum_type,
        })
    }

    /// Checksums exist from MySQL 5.6.1 and MariaDB 5.3.
    fn mysql_version_has_checksum(version: &str) -> bool {
        let mut parts = version.split('.');
        let major: u32 = match parts.next().and_then(|p| p.parse().ok()) {
            Some(major) => major,
            None => return true,
        };
        let minor: u32 = parts
            .next()
            .map(|p| {
                p.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
            })
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);

        if version.contains("MariaDB") {
            return major > 5 || (major == 5 && minor >= 3);
        }
        major > 5 || (major == 5 && minor >= 6)
    }

    fn decode_table_map(&self, data: &[u8]) -> Result<TableMapEvent> {
        let mut reader = PayloadReader::new(data);

        let table_id = reader.uint_le(6)?;
        let _flags = reader.u16_le()?;

        let schema_len = reader.u8()? as usize;
        let schema_name = String::from_utf8_lossy(reader.bytes(schema_len)?).to_string();
        reader.skip(1)?;

        let table_len = reader.u8()? as usize;
        let table_name = String::from_utf8_lossy(reader.bytes(table_len)?).to_string();
        reader.skip(1)?;

        let column_count = reader.packed_int()? as usize;
        let column_types = reader
            .bytes(column_count)?
            .iter()
            .map(|&code| {
                ColumnType::from_u8(code).ok_or_else(|| {
                    FlashbackError::decode(format!(
                        "unknown column type {} in `{}`.`{}`",
                        code, schema_name, table_name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let metadata_len = reader.packed_int()? as usize;
        let mut metadata_reader = PayloadReader::new(reader.bytes(metadata_len)?);
        let column_metadata = decode_column_metadata(&column_types, &mut metadata_reader)?;

        // Null bitmap and optional metadata follow; not needed here

        Ok(TableMapEvent {
            table_id,
            schema_name,
            table_name,
            column_types,
            column_metadata,
        })
    }

    fn decode_rows_event(&self, data: &[u8], event_type: EventType) -> Result<RowsPayload> {
        let mut reader = PayloadReader::new(data);

        let table_id = reader.uint_le(6)?;
        let _flags = reader.u16_le()?;

        if event_type.is_rows_v2() {
            // Length includes its own two bytes
            let extra_len = reader.u16_le()? as usize;
            reader.skip(extra_len.saturating_sub(2))?;
        }

        let column_count = reader.packed_int()? as usize;
        let bitmap_len = column_count.div_ceil(8);
        let present = reader.bytes(bitmap_len)?;
        let is_update = matches!(event_type, EventType::UpdateRowsV1 | EventType::UpdateRowsV2);
        let present_after = if is_update {
            reader.bytes(bitmap_len)?
        } else {
            present
        };

        let Some(table_map) = self.table_cache.get(&table_id) else {
            // Column types unknown: rows cannot be decoded
            debug!("Rows event for unmapped table id {}", table_id);
            return Ok(RowsPayload::new(table_id, Vec::new()));
        };
        if table_map.column_types.len() != column_count {
            return Err(FlashbackError::decode(format!(
                "rows event for `{}`.`{}` has {} columns, table map has {}",
                table_map.schema_name,
                table_map.table_name,
                column_count,
                table_map.column_types.len()
            )));
        }

        let is_insert = matches!(event_type, EventType::WriteRowsV1 | EventType::WriteRowsV2);
        let mut rows = Vec::new();
        while reader.remaining() > 0 {
            let first = decode_row_values(&mut reader, table_map, present)?;
            let image = if is_update {
                let after = decode_row_values(&mut reader, table_map, present_after)?;
                RowImage::updated(first, after)
            } else if is_insert {
                RowImage::inserted(first)
            } else {
                RowImage::deleted(first)
            };
            rows.push(image);
        }

        trace!("Decoded {} rows for table id {}", rows.len(), table_id);
        Ok(RowsPayload::new(table_id, rows)
            .with_table(&table_map.schema_name, &table_map.table_name))
    }

    fn decode_query(&self, data: &[u8]) -> Result<EventPayload> {
        let mut reader = PayloadReader::new(data);

        let _thread_id = reader.u32_le()?;
        let _exec_time = reader.u32_le()?;
        let schema_len = reader.u8()? as usize;
        let _error_code = reader.u16_le()?;
        let status_vars_len = reader.u16_le()? as usize;
        reader.skip(status_vars_len)?;

        let schema = String::from_utf8_lossy(reader.bytes(schema_len)?).to_string();
        reader.skip(1)?;
        let query = String::from_utf8_lossy(reader.rest()).to_string();

        Ok(match query.trim() {
            "BEGIN" => EventPayload::TransactionBegin { schema },
            "COMMIT" => EventPayload::TransactionCommit { xid: None },
            _ => EventPayload::SchemaChange { schema, query },
        })
    }

    fn decode_gtid(&self, data: &[u8]) -> Result<GtidEvent> {
        let mut reader = PayloadReader::new(data);
        let flags = reader.u8()?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(reader.bytes(16)?);
        let gno = reader.u64_le()?;
        Ok(GtidEvent { flags, uuid, gno })
    }
}

fn decode_column_metadata(
    column_types: &[ColumnType],
    reader: &mut PayloadReader<'_>,
) -> Result<Vec<u16>> {
    column_types
        .iter()
        .map(|col_type| {
            Ok(match col_type {
                ColumnType::Float
                | ColumnType::Double
                | ColumnType::Blob
                | ColumnType::TinyBlob
                | ColumnType::MediumBlob
                | ColumnType::LongBlob
                | ColumnType::Json
                | ColumnType::Geometry
                | ColumnType::Time2
                | ColumnType::DateTime2
                | ColumnType::Timestamp2 => u16::from(reader.u8()?),
                ColumnType::Bit | ColumnType::Varchar | ColumnType::VarString => reader.u16_le()?,
                // (real type or precision) first, then (length or scale)
                ColumnType::NewDecimal
                | ColumnType::String
                | ColumnType::Enum
                | ColumnType::Set => reader.uint_be(2)? as u16,
                _ => 0,
            })
        })
        .collect()
}

fn decode_row_values(
    reader: &mut PayloadReader<'_>,
    table_map: &TableMapEvent,
    present: &[u8],
) -> Result<Vec<RowValue>> {
    let present_count = count_set_bits(present);
    let null_bitmap = reader.bytes(present_count.div_ceil(8))?;

    let mut values = Vec::with_capacity(present_count);
    let mut null_idx = 0;
    for (col_idx, col_type) in table_map.column_types.iter().enumerate() {
        if !is_bit_set(present, col_idx) {
            continue;
        }
        let is_null = is_bit_set(null_bitmap, null_idx);
        null_idx += 1;
        if is_null {
            values.push(RowValue::Null);
            continue;
        }
        let metadata = table_map.column_metadata.get(col_idx).copied().unwrap_or(0);
        values.push(decode_column_value(reader, *col_type, metadata)?);
    }
    Ok(values)
}

fn text_or_unsupported(bytes: &[u8]) -> RowValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => RowValue::Text(text.to_string()),
        Err(_) => RowValue::Unsupported,
    }
}

fn decode_column_value(
    reader: &mut PayloadReader<'_>,
    col_type: ColumnType,
    metadata: u16,
) -> Result<RowValue> {
    let value = match col_type {
        ColumnType::Tiny => RowValue::Integer(i64::from(reader.u8()? as i8)),
        ColumnType::Short => RowValue::Integer(i64::from(reader.u16_le()? as i16)),
        ColumnType::Int24 => {
            let raw = reader.uint_le(3)? as u32;
            // sign extend from 24 bits
            RowValue::Integer(i64::from(((raw << 8) as i32) >> 8))
        }
        ColumnType::Long => RowValue::Integer(i64::from(reader.u32_le()? as i32)),
        ColumnType::LongLong => RowValue::Integer(reader.u64_le()? as i64),
        ColumnType::Float => RowValue::Float(f64::from(reader.f32_le()?)),
        ColumnType::Double => RowValue::Float(reader.f64_le()?),
        ColumnType::Year => match reader.u8()? {
            0 => RowValue::Integer(0),
            year => RowValue::Integer(1900 + i64::from(year)),
        },
        ColumnType::Null => RowValue::Null,
        ColumnType::Date | ColumnType::NewDate => {
            let packed = reader.uint_le(3)?;
            RowValue::Text(format!(
                "{:04}-{:02}-{:02}",
                (packed >> 9) & 0x7FFF,
                (packed >> 5) & 0x0F,
                packed & 0x1F
            ))
        }
        ColumnType::Time => {
            let packed = reader.uint_le(3)?;
            RowValue::Text(format!(
                "{:02}:{:02}:{:02}",
                packed / 10000,
                (packed / 100) % 100,
                packed % 100
            ))
        }
        ColumnType::DateTime => {
            let packed = reader.u64_le()?;
            RowValue::Text(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                packed / 10_000_000_000,
                (packed / 100_000_000) % 100,
                (packed / 1_000_000) % 100,
                (packed / 10_000) % 100,
                (packed / 100) % 100,
                packed % 100
            ))
        }
        ColumnType::Timestamp => RowValue::Text(format_epoch(reader.u32_le()?, 0, 0)),
        ColumnType::Timestamp2 => {
            let seconds = reader.uint_be(4)? as u32;
            let fsp = metadata as u8;
            let micros = read_fractional_seconds(reader, fsp)?;
            RowValue::Text(format_epoch(seconds, micros, fsp))
        }
        ColumnType::DateTime2 => {
            let packed = reader.uint_be(5)?;
            let fsp = metadata as u8;
            let micros = read_fractional_seconds(reader, fsp)?;

            let year_month = (packed >> 22) & 0x1FFFF;
            RowValue::Text(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}{}",
                year_month / 13,
                year_month % 13,
                (packed >> 17) & 0x1F,
                (packed >> 12) & 0x1F,
                (packed >> 6) & 0x3F,
                packed & 0x3F,
                fraction_suffix(micros, fsp)
            ))
        }
        ColumnType::Time2 => {
            let fsp = (metadata as u8).min(6);
            let frac_bytes = usize::from(fsp).div_ceil(2);
            // Whole value is big-endian, offset by 0x80.. so negatives sort first
            let raw = reader.uint_be(3 + frac_bytes)? as i64;
            let offset = 1i64 << (8 * (3 + frac_bytes) - 1);
            let mut value = raw - offset;
            let negative = value < 0;
            if negative {
                value = -value;
            }
            let frac_unit = 8 * frac_bytes as u32;
            let int_part = value >> frac_unit;
            let frac = (value & ((1i64 << frac_unit) - 1)) as u32;
            let micros = frac * 10u32.pow(6 - 2 * frac_bytes as u32);
            RowValue::Text(format!(
                "{}{:02}:{:02}:{:02}{}",
                if negative { "-" } else { "" },
                (int_part >> 12) & 0x3FF,
                (int_part >> 6) & 0x3F,
                int_part & 0x3F,
                fraction_suffix(micros, fsp)
            ))
        }
        ColumnType::Varchar | ColumnType::VarString => {
            let len = if metadata < 256 {
                reader.u8()? as usize
            } else {
                reader.u16_le()? as usize
            };
            text_or_unsupported(reader.bytes(len)?)
        }
        ColumnType::String | ColumnType::Enum | ColumnType::Set => {
            let mut real_type = (metadata >> 8) as u8;
            let mut max_len = metadata & 0xFF;
            // Lengths above 255 borrow two bits from the type byte
            if real_type & 0x30 != 0x30 {
                max_len |= u16::from((real_type & 0x30) ^ 0x30) << 4;
                real_type |= 0x30;
            }
            if col_type == ColumnType::Enum || real_type == ColumnType::Enum as u8 {
                RowValue::Integer(reader.uint_le(usize::from(max_len.clamp(1, 2)))? as i64)
            } else if col_type == ColumnType::Set || real_type == ColumnType::Set as u8 {
                RowValue::Integer(reader.uint_le(usize::from(max_len.clamp(1, 8)))? as i64)
            } else {
                let len = if max_len > 255 {
                    reader.u16_le()? as usize
                } else {
                    reader.u8()? as usize
                };
                text_or_unsupported(reader.bytes(len)?)
            }
        }
        ColumnType::Blob | ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob => {
            let len = reader.uint_le(usize::from(metadata.clamp(1, 4)))? as usize;
            text_or_unsupported(reader.bytes(len)?)
        }
        ColumnType::Json | ColumnType::Geometry => {
            let len = reader.uint_le(usize::from(metadata.clamp(1, 4)))? as usize;
            reader.skip(len)?;
            RowValue::Unsupported
        }
        ColumnType::NewDecimal => {
            let precision = (metadata >> 8) as usize;
            let scale = (metadata & 0xFF) as usize;
            RowValue::Text(decode_decimal(reader, precision, scale)?)
        }
        ColumnType::Bit => {
            let nbits = usize::from(metadata >> 8) * 8 + usize::from(metadata & 0xFF);
            let len = nbits.div_ceil(8);
            if len > 8 {
                reader.skip(len)?;
                RowValue::Unsupported
            } else {
                RowValue::Integer(reader.uint_be(len)? as i64)
            }
        }
        ColumnType::Decimal => {
            return Err(FlashbackError::decode(
                "pre-5.0 DECIMAL columns cannot be decoded",
            ))
        }
    };
    Ok(value)
}

/// Fractional seconds in microseconds for precision `fsp` (0-6).
fn read_fractional_seconds(reader: &mut PayloadReader<'_>, fsp: u8) -> Result<u32> {
    let bytes = usize::from(fsp.min(6)).div_ceil(2);
    if bytes == 0 {
        return Ok(0);
    }
    let value = reader.uint_be(bytes)? as u32;
    Ok(value * 10u32.pow(6 - 2 * bytes as u32))
}

fn fraction_suffix(micros: u32, fsp: u8) -> String {
    let fsp = u32::from(fsp.min(6));
    if fsp == 0 {
        return String::new();
    }
    format!(
        ".{:0width$}",
        micros / 10u32.pow(6 - fsp),
        width = fsp as usize
    )
}

fn format_epoch(seconds: u32, micros: u32, fsp: u8) -> String {
    if seconds == 0 {
        return format!("0000-00-00 00:00:00{}", fraction_suffix(micros, fsp));
    }
    let base = match Local.timestamp_opt(i64::from(seconds), 0).single() {
        Some(dt) => dt.format(TIME_LAYOUT).to_string(),
        None => seconds.to_string(),
    };
    format!("{}{}", base, fraction_suffix(micros, fsp))
}

fn count_set_bits(bitmap: &[u8]) -> usize {
    bitmap.iter().map(|b| b.count_ones() as usize).sum()
}

fn is_bit_set(bitmap: &[u8], idx: usize) -> bool {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;
    byte_idx < bitmap.len() && (bitmap[byte_idx] & (1 << bit_idx)) != 0
}

fn decode_decimal(reader: &mut PayloadReader<'_>, precision: usize, scale: usize) -> Result<String> {
    if precision == 0 || scale > precision {
        return Err(FlashbackError::decode(format!(
            "invalid DECIMAL({}, {})",
            precision, scale
        )));
    }
    let int_digits = precision - scale;
    let int_words = int_digits / 9;
    let int_leftover = int_digits % 9;
    let frac_words = scale / 9;
    let frac_leftover = scale % 9;

    let leftover_bytes = |digits: usize| -> usize { [0, 1, 1, 2, 2, 3, 3, 4, 4, 4][digits] };
    let int_leftover_bytes = leftover_bytes(int_leftover);
    let frac_leftover_bytes = leftover_bytes(frac_leftover);
    let total_bytes = int_leftover_bytes + int_words * 4 + frac_words * 4 + frac_leftover_bytes;

    let mut bytes = reader.bytes(total_bytes)?.to_vec();

    // Sign bit is stored inverted; negatives are stored as complement
    let negative = (bytes[0] & 0x80) == 0;
    bytes[0] ^= 0x80;
    if negative {
        for b in bytes.iter_mut() {
            *b = !*b;
        }
    }

    let mut digits = PayloadReader::new(&bytes);
    let mut int_part = String::new();

    if int_leftover_bytes > 0 {
        let val = digits.uint_be(int_leftover_bytes)?;
        if val > 0 {
            int_part.push_str(&val.to_string());
        }
    }
    for _ in 0..int_words {
        let val = digits.uint_be(4)?;
        if int_part.is_empty() {
            if val > 0 {
                int_part.push_str(&val.to_string());
            }
        } else {
            int_part.push_str(&format!("{:09}", val));
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut result = String::new();
    if negative {
        result.push('-');
    }
    result.push_str(&int_part);

    if scale > 0 {
        result.push('.');
        for _ in 0..frac_words {
            result.push_str(&format!("{:09}", digits.uint_be(4)?));
        }
        if frac_leftover_bytes > 0 {
            let val = digits.uint_be(frac_leftover_bytes)?;
            result.push_str(&format!("{:0width$}", val, width = frac_leftover));
        }
    }
    Ok(result)
}
