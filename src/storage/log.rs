//! Append-only batch log.
//!
//! The database file is a header followed by frames. Each frame holds one
//! committed batch of storage operations:
//!
//! ```text
//! [len: u32 LE][msgpack payload: len bytes][crc32 of payload: u32 LE]
//! ```
//!
//! A batch is visible after restart only if its whole frame made it to disk.
//! A torn frame at the tail is truncated on open; a bad checksum anywhere
//! else is reported as corruption.

use crate::error::{Result, StoreError};
use crate::schema::{ColumnSchema, TableSchema};
use crate::types::{Row, RowId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the database file.
const LOG_MAGIC: &[u8; 4] = b"KNT\0";

/// Current database file format version.
const LOG_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 5;

/// Frames larger than this are treated as corrupt lengths.
const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// A single storage mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StorageOp {
    SetVersion { version: u32, fingerprint: String },
    /// The one-time sample data has been written.
    MarkSeeded,
    CreateTable(TableSchema),
    AddColumns { table: String, columns: Vec<ColumnSchema> },
    Put { table: String, row: Row },
    Remove { table: String, id: RowId },
}

/// A committed batch as read back from disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub ops: Vec<StorageOp>,
}

/// Borrowed form for encoding; field order must match [`Frame`].
#[derive(Serialize)]
struct FrameRef<'a> {
    seq: u64,
    timestamp: Timestamp,
    ops: &'a [StorageOp],
}

enum ReadOutcome {
    Frame(Frame, u64),
    End,
    Torn(&'static str),
}

struct LogState {
    file: File,
    size: u64,
    next_seq: u64,
    frames: u64,
}

/// The on-disk database file.
pub struct BatchLog {
    path: PathBuf,
    state: Mutex<LogState>,
    sync_on_commit: bool,
}

impl BatchLog {
    /// Open or create the database file and read back every committed frame.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Vec<Frame>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            // A crash while creating the file can leave part of the header.
            let mut existing = Vec::new();
            file.read_to_end(&mut existing)?;
            if !Self::header().starts_with(&existing) {
                return Err(StoreError::InvalidFormat("Invalid database magic".into()));
            }
            if len > 0 {
                warn!(path = %path.display(), len, "rewriting incomplete database header");
            }
            file.set_len(0)?;
            Self::write_at(&mut file, 0, &Self::header(), true)?;
        }

        let (frames, good_size) = Self::read_frames(&file)?;
        let file_size = file.metadata()?.len();
        if good_size < file_size {
            warn!(
                path = %path.display(),
                dropped_bytes = file_size - good_size,
                "truncating incomplete batch at end of database file"
            );
            file.set_len(good_size)?;
            file.sync_all()?;
        }

        let next_seq = frames.last().map(|f| f.seq + 1).unwrap_or(1);
        debug!(path = %path.display(), frames = frames.len(), "opened database file");

        let log = Self {
            path,
            state: Mutex::new(LogState {
                file,
                size: good_size,
                next_seq,
                frames: frames.len() as u64,
            }),
            sync_on_commit,
        };
        Ok((log, frames))
    }

    /// Append one batch. On failure the file is cut back to its previous size.
    pub fn append(&self, ops: &[StorageOp]) -> Result<u64> {
        let mut state = self.state.lock();
        let seq = state.next_seq;

        let bytes = Self::encode_frame(seq, ops)?;
        let start = state.size;

        if let Err(e) = Self::write_at(&mut state.file, start, &bytes, self.sync_on_commit) {
            let _ = state.file.set_len(start);
            return Err(e.into());
        }

        state.size = start + bytes.len() as u64;
        state.next_seq += 1;
        state.frames += 1;
        Ok(seq)
    }

    /// Replace the whole file with a single frame holding `ops`.
    ///
    /// Written to a sibling file first and renamed into place, so a crash
    /// leaves either the old or the new file.
    pub fn rewrite(&self, ops: &[StorageOp]) -> Result<()> {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        let bytes = Self::encode_frame(seq, ops)?;

        // The handle stays valid across the rename, so after it the log
        // always writes to the file that will be read back.
        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&Self::header())?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        state.file = tmp;
        state.size = HEADER_SIZE + bytes.len() as u64;
        state.next_seq = seq + 1;
        state.frames = 1;
        Ok(())
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Number of frames currently in the file.
    pub fn frame_count(&self) -> u64 {
        self.state.lock().frames
    }

    /// Block appends until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> impl Sized + '_ {
        self.state.lock()
    }

    fn header() -> Vec<u8> {
        let mut header = LOG_MAGIC.to_vec();
        header.push(LOG_VERSION);
        header
    }

    fn encode_frame(seq: u64, ops: &[StorageOp]) -> Result<Vec<u8>> {
        let payload = rmp_serde::to_vec(&FrameRef {
            seq,
            timestamp: Timestamp::now(),
            ops,
        })?;

        let mut bytes = Vec::with_capacity(payload.len() + 8);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(bytes)
    }

    fn write_at(file: &mut File, offset: u64, bytes: &[u8], sync: bool) -> std::io::Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Read all frames; returns them with the size of the valid prefix.
    fn read_frames(file: &File) -> Result<(Vec<Frame>, u64)> {
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid database magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported database format version: {}",
                version[0]
            )));
        }

        let mut frames = Vec::new();
        let mut offset = HEADER_SIZE;
        loop {
            match Self::read_frame(&mut reader, offset, file_size)? {
                ReadOutcome::Frame(frame, len) => {
                    frames.push(frame);
                    offset += len;
                }
                ReadOutcome::End => break,
                ReadOutcome::Torn(reason) => {
                    warn!(offset, reason, "incomplete batch found");
                    break;
                }
            }
        }

        Ok((frames, offset))
    }

    fn read_frame<R: Read>(reader: &mut R, offset: u64, file_size: u64) -> Result<ReadOutcome> {
        let remaining = file_size - offset;
        if remaining == 0 {
            return Ok(ReadOutcome::End);
        }
        if remaining < 8 {
            return Ok(ReadOutcome::Torn("short frame header"));
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(StoreError::Corruption(format!(
                "frame at offset {} claims {} bytes",
                offset, len
            )));
        }
        let total = 4 + len as u64 + 4;
        if total > remaining {
            return Ok(ReadOutcome::Torn("frame extends past end of file"));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&payload);

        if stored != computed {
            if total == remaining {
                return Ok(ReadOutcome::Torn("checksum mismatch in last frame"));
            }
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let frame: Frame = rmp_serde::from_slice(&payload)?;
        Ok(ReadOutcome::Frame(frame, total))
    }
}
