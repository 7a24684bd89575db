//! Out-of-place line reversal
//!
//! Rewrites a file so its lines appear in reverse order while the bytes of
//! each line stay as they were. The file is read backward in chunks and only
//! the current line is held in memory. The result is written next to the
//! input as `<name>.temp`, synced, size-checked and then renamed over the
//! input. On any failure the input file is left untouched.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::common::{FlashbackError, Result};

/// Default backward read size.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const LINE_DELIMITER: u8 = b'\n';

/// Reverse the line order of the file at `path` in place.
///
/// Returns the number of lines written.
pub async fn reverse_lines(path: impl AsRef<Path>) -> Result<u64> {
    reverse_lines_with_chunk_size(path, DEFAULT_CHUNK_SIZE).await
}

/// [`reverse_lines`] with an explicit read chunk size.
pub async fn reverse_lines_with_chunk_size(path: impl AsRef<Path>, chunk_size: usize) -> Result<u64> {
    let path = path.as_ref();
    if chunk_size == 0 {
        return Err(FlashbackError::config("reversal chunk size must be positive"));
    }
    let temp_path = temp_path_for(path);

    match write_reversed(path, &temp_path, chunk_size).await {
        Ok(lines) => {
            fs::rename(&temp_path, path).await?;
            debug!("Reversed {} lines in {}", lines, path.display());
            Ok(lines)
        }
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(&temp_path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "Failed to remove {}: {}",
                        temp_path.display(),
                        remove_err
                    );
                }
            }
            Err(e)
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".temp");
    PathBuf::from(name)
}

async fn write_reversed(source: &Path, target: &Path, chunk_size: usize) -> Result<u64> {
    let mut input = File::open(source).await?;
    let size = input.metadata().await?.len();

    let output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)
        .await?;
    let mut writer = BufWriter::new(output);

    let mut chunk = vec![0u8; chunk_size];
    // Bytes of the current line, last byte first
    let mut pending: Vec<u8> = Vec::new();
    let mut written: u64 = 0;
    let mut lines: u64 = 0;
    let mut cursor = size;
    let mut at_end = true;

    while cursor > 0 {
        let len = chunk_size.min(cursor as usize);
        cursor -= len as u64;
        input.seek(SeekFrom::Start(cursor)).await?;
        input.read_exact(&mut chunk[..len]).await?;

        for &byte in chunk[..len].iter().rev() {
            if at_end {
                at_end = false;
                // The delimiter closing the last line does not start a new one
                if byte == LINE_DELIMITER {
                    continue;
                }
            }
            if byte == LINE_DELIMITER {
                written += emit_line(&mut writer, &mut pending).await?;
                lines += 1;
            } else {
                pending.push(byte);
            }
        }
    }
    if size > 0 {
        written += emit_line(&mut writer, &mut pending).await?;
        lines += 1;
    }

    writer.flush().await?;
    let output = writer.into_inner();
    output.sync_all().await?;

    let actual = output.metadata().await?.len();
    if actual != written {
        return Err(FlashbackError::output(format!(
            "reversed output {} holds {} bytes, expected {}",
            target.display(),
            actual,
            written
        )));
    }
    Ok(lines)
}

async fn emit_line(writer: &mut BufWriter<File>, pending: &mut Vec<u8>) -> Result<u64> {
    pending.reverse();
    pending.push(LINE_DELIMITER);
    writer.write_all(pending).await?;
    let len = pending.len() as u64;
    pending.clear();
    Ok(len)
}
