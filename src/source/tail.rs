use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size used when scanning a file backwards for backlog lines.
const BACKLOG_CHUNK: u64 = 8 * 1024;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was stat-ed but the byte range could not be read. The reader
    /// has already moved past the range.
    #[error("failed to read {path} at offset {offset}: {source}")]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

impl TailError {
    /// True when the file no longer exists.
    pub fn is_not_found(&self) -> bool {
        match self {
            TailError::Stat { source, .. } | TailError::Read { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
        }
    }
}

/// Bytes appended to a file since the previous read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// Offset the bytes were read from.
    pub start: u64,
    pub bytes: Vec<u8>,
    /// File size observed for this read; the reader's offset afterwards.
    pub size: u64,
    /// The file shrank or was replaced; `bytes` is empty.
    pub truncated: bool,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Byte-offset cursor over one growing file.
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    offset: u64,
    file_id: Option<u64>,
}

impl TailReader {
    /// A reader positioned at the start of the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::at_offset(path, 0)
    }

    pub fn at_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            file_id: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads `[offset, size)` and advances the offset to `size`.
    ///
    /// When the file is smaller than the offset, or a different file now sits
    /// at the path, the offset is reset to the new size and nothing is
    /// returned. Bytes lost to rotation are not recovered.
    pub async fn read_delta(&mut self) -> Result<Delta, TailError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|source| TailError::Stat {
                path: self.path.clone(),
                source,
            })?;
        let size = metadata.len();
        let file_id = file_id(&metadata);

        let replaced = matches!((self.file_id, file_id), (Some(old), Some(new)) if old != new);
        self.file_id = file_id;

        if size < self.offset || (replaced && self.offset > 0) {
            self.offset = size;
            return Ok(Delta {
                start: size,
                bytes: Vec::new(),
                size,
                truncated: true,
            });
        }

        let start = self.offset;
        if size == start {
            return Ok(Delta {
                start,
                bytes: Vec::new(),
                size,
                truncated: false,
            });
        }

        // The gap is skipped on failure; the range is never retried.
        self.offset = size;
        let bytes = read_range(&self.path, start, size)
            .await
            .map_err(|source| TailError::Read {
                path: self.path.clone(),
                offset: start,
                source,
            })?;

        Ok(Delta {
            start,
            bytes,
            size,
            truncated: false,
        })
    }
}

async fn read_range(path: &Path, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut bytes = Vec::with_capacity((end - start) as usize);
    file.take(end - start).read_to_end(&mut bytes).await?;
    Ok(bytes)
}

/// Returns the last `max_lines` non-empty lines of `path` that end before
/// byte `end`, oldest first. The file is scanned backwards in chunks so only
/// the tail is read.
pub async fn read_last_lines(path: &Path, end: u64, max_lines: usize) -> std::io::Result<Vec<String>> {
    if max_lines == 0 || end == 0 {
        return Ok(Vec::new());
    }

    let mut file = File::open(path).await?;
    let mut pos = end;
    let mut buf: Vec<u8> = Vec::new();

    // Stop once the buffer holds one more newline than needed, so the
    // earliest kept line is known to be complete.
    while pos > 0 && count_non_empty_lines(&buf) <= max_lines {
        let len = BACKLOG_CHUNK.min(pos);
        pos -= len;
        file.seek(SeekFrom::Start(pos)).await?;

        let mut chunk = vec![0u8; len as usize];
        file.read_exact(&mut chunk).await?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if pos > 0 && !lines.is_empty() {
        // First line may be cut by the chunk boundary.
        lines.remove(0);
    }

    let lines: Vec<String> = lines
        .into_iter()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();

    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines.into_iter().skip(skip).collect())
}

fn count_non_empty_lines(buf: &[u8]) -> usize {
    buf.split(|b| *b == b'\n')
        .filter(|l| l.iter().any(|b| !b.is_ascii_whitespace()))
        .count()
}

/// Splits a byte stream into complete lines, holding back an unterminated
/// tail (and any multi-byte sequence inside it) until its newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    remainder: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them, decoded as
    /// UTF-8 with lossy replacement and without the line terminator.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.remainder.extend_from_slice(bytes);

        let Some(last_newline) = self.remainder.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.remainder.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.remainder, rest);

        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.remainder.clear();
    }
}

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> Option<u64> {
    None
}
