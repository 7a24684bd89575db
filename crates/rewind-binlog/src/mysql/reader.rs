//! Binlog file reader
//!
//! Streams events from a local binlog file. The file must start with the
//! binlog magic followed by a format description event; the reader decodes
//! that event first (checksum detection) and then seeks to the requested
//! offset.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tracing::{debug, warn};

use super::decoder::{BinlogDecoder, EventHeader, EventType};
use crate::common::{
    DecodedEvent, EventPayload, EventSource, EventSourceOpener, FlashbackError, LogFile, Result,
    BINLOG_FIRST_EVENT_OFFSET,
};

/// Magic bytes at the start of every binlog file.
pub const BINLOG_MAGIC: [u8; 4] = [0xfe, b'b', b'i', b'n'];

/// Sequential reader over one binlog file.
pub struct BinlogFileReader {
    reader: BufReader<File>,
    path: PathBuf,
    decoder: BinlogDecoder,
    /// Offset of the next unread byte
    position: u64,
}

impl BinlogFileReader {
    /// Open `path` and position the reader at `offset`.
    ///
    /// Offsets at or before the first event start right after the format
    /// description event.
    pub async fn open(path: impl AsRef<Path>, offset: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let mut reader = Self {
            reader: BufReader::new(file),
            path,
            decoder: BinlogDecoder::new(),
            position: 0,
        };

        let mut magic = [0u8; 4];
        if reader.read_full(&mut magic).await? < magic.len() || magic != BINLOG_MAGIC {
            return Err(FlashbackError::decode(format!(
                "{} is not a binlog file",
                reader.path.display()
            )));
        }
        reader.position = BINLOG_FIRST_EVENT_OFFSET;

        let Some(raw) = reader.read_raw().await? else {
            return Err(FlashbackError::decode(format!(
                "{} has no format description event",
                reader.path.display()
            )));
        };
        let (header, _) = reader.decode(&raw)?;
        if header.event_type != EventType::FormatDescription {
            return Err(FlashbackError::decode(format!(
                "{} starts with {:?} instead of a format description",
                reader.path.display(),
                header.event_type
            )));
        }

        if offset > reader.position {
            reader.reader.seek(SeekFrom::Start(offset)).await?;
            reader.position = offset;
        }
        debug!(
            "Opened {} at {} (checksum={})",
            reader.path.display(),
            reader.position,
            reader.decoder.has_checksum()
        );
        Ok(reader)
    }

    /// Offset of the next event.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill `buf` as far as the file allows; returns the bytes read.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Next raw event, or `None` at end of file or on a truncated tail.
    async fn read_raw(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; EventHeader::SIZE];
        let read = self.read_full(&mut header).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < header.len() {
            self.warn_truncated(read);
            return Ok(None);
        }

        let event_length = EventHeader::parse(&header)?.event_length as usize;
        if event_length < EventHeader::SIZE {
            return Err(FlashbackError::decode(format!(
                "{}:{}: event length {} is shorter than its header",
                self.path.display(),
                self.position,
                event_length
            )));
        }

        let mut raw = vec![0u8; event_length];
        raw[..EventHeader::SIZE].copy_from_slice(&header);
        let body = self.read_full(&mut raw[EventHeader::SIZE..]).await?;
        if body < event_length - EventHeader::SIZE {
            self.warn_truncated(EventHeader::SIZE + body);
            return Ok(None);
        }

        self.position += event_length as u64;
        Ok(Some(raw))
    }

    fn warn_truncated(&self, available: usize) {
        warn!(
            "{}: truncated event at {} ({} bytes available), stopping",
            self.path.display(),
            self.position,
            available
        );
    }

    fn decode(&mut self, raw: &[u8]) -> Result<(EventHeader, Option<EventPayload>)> {
        let start = self.position - raw.len() as u64;
        self.decoder.decode(raw).map_err(|e| match e {
            FlashbackError::Decode(msg) => FlashbackError::decode(format!(
                "{}:{}: {}",
                self.path.display(),
                start,
                msg
            )),
            other => other,
        })
    }
}

#[async_trait]
impl EventSource for BinlogFileReader {
    async fn next_event(&mut self) -> Result<Option<DecodedEvent>> {
        while let Some(raw) = self.read_raw().await? {
            let (header, payload) = self.decode(&raw)?;
            if let Some(payload) = payload {
                return Ok(Some(DecodedEvent::new(
                    header.timestamp,
                    self.position,
                    raw.len() as u64,
                    payload,
                )));
            }
        }
        Ok(None)
    }
}

/// Opens [`BinlogFileReader`]s for local binlog files.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinlogFileOpener;

#[async_trait]
impl EventSourceOpener for BinlogFileOpener {
    async fn open(&self, file: &LogFile, offset: u64) -> Result<Box<dyn EventSource>> {
        Ok(Box::new(BinlogFileReader::open(&file.path, offset).await?))
    }
}
