//! Byte-addressable storage backends for snapshots and WALs.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A seekable byte store with durability control.
///
/// Backends run to completion on the caller's stack; there is no internal
/// buffering beyond what the operating system provides.
pub trait Store {
    /// Writes all of `data` at the current position.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Reads up to `buf.len()` bytes at the current position, returning the
    /// count actually read (0 at end of store).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seeks to a position, returning the new absolute offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// The current absolute position.
    fn tell(&mut self) -> Result<u64>;

    /// Flushes written data to durable storage.
    fn sync(&mut self) -> Result<()>;

    /// Truncates the store at the current position.
    fn truncate(&mut self) -> Result<()>;

    /// Total store size in bytes.
    fn size(&mut self) -> Result<u64>;
}

/// Reads exactly `buf.len()` bytes or reports how many were available.
pub(crate) fn read_exact_or_len(store: &mut dyn Store, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = store.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// File-backed store.
pub struct FileStore {
    file: File,
}

impl FileStore {
    /// Opens (or creates) a read/write store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

impl Store for FileStore {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self) -> Result<()> {
        let pos = self.file.stream_position()?;
        self.file.set_len(pos)?;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// Memory-backed store for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemStore {
    buf: Vec<u8>,
    pos: usize,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// The current contents, for inspection.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }
}

impl Store for MemStore {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let available = self.buf.len().saturating_sub(self.pos);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::End(off) => self.buf.len() as i64 + off,
            SeekFrom::Current(off) => self.pos as i64 + off,
        };
        if target < 0 {
            return Err(crate::error::Error::InvalidArgument("seek before start"));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self) -> Result<()> {
        self.buf.truncate(self.pos);
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.buf.len() as u64)
    }
}
