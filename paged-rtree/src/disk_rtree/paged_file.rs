//! Buffered window over a file of fixed-size records.
//!
//! One in-memory window, a multiple of the record length, is mapped onto a
//! contiguous region of the file. A request outside the window first writes
//! the window's dirty region back, then loads the window that contains the
//! requested record. Offsets handed to this layer are absolute file offsets;
//! the window grid starts at `base_offset`, so the bytes before it (a
//! header, for instance) are only reachable through `read_prefix` /
//! `write_prefix`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::rtree_types::{IoContext, SpatialError, SpatialResult};

pub struct PagedFile {
    file: File,
    path: PathBuf,
    base_offset: u64,
    record_len: usize,
    window: Vec<u8>,
    /// Start of the loaded window, relative to `base_offset`
    window_start: Option<u64>,
    /// Bytes of the window not yet written back
    dirty: Option<Range<usize>>,
    /// Length of the record region including unflushed writes
    data_len: u64,
    reads: u64,
    writes: u64,
}

impl PagedFile {
    /// Create (or truncate) a file
    pub fn create(
        path: &Path,
        base_offset: u64,
        record_len: usize,
        window_length: usize,
    ) -> SpatialResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .io_context("create file", 0)?;

        Ok(Self::with_file(file, path, base_offset, record_len, window_length, 0))
    }

    /// Open an existing file
    pub fn open(
        path: &Path,
        base_offset: u64,
        record_len: usize,
        window_length: usize,
    ) -> SpatialResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .io_context("open file", 0)?;
        let file_len = file.metadata().io_context("stat file", 0)?.len();
        let data_len = file_len.saturating_sub(base_offset);

        Ok(Self::with_file(
            file,
            path,
            base_offset,
            record_len,
            window_length,
            data_len,
        ))
    }

    fn with_file(
        file: File,
        path: &Path,
        base_offset: u64,
        record_len: usize,
        window_length: usize,
        data_len: u64,
    ) -> Self {
        let record_len = record_len.max(1);
        let window_len = (window_length / record_len).max(1) * record_len;
        Self {
            file,
            path: path.to_path_buf(),
            base_offset,
            record_len,
            window: vec![0u8; window_len],
            window_start: None,
            dirty: None,
            data_len,
            reads: 0,
            writes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn window_length(&self) -> usize {
        self.window.len()
    }

    /// Bytes in the record region, counting writes still held in the window
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn record_count(&self) -> u64 {
        self.data_len / self.record_len as u64
    }

    /// Number of window loads and write-backs since open
    pub fn io_counts(&self) -> (u64, u64) {
        (self.reads, self.writes)
    }

    /// Read the record stored at an absolute offset
    pub fn read_record(&mut self, offset: u64) -> SpatialResult<&[u8]> {
        let relative = self.relative(offset)?;
        if relative + self.record_len as u64 > self.data_len {
            return Err(SpatialError::CorruptStore(format!(
                "record at offset {} lies beyond the end of {}",
                offset,
                self.path.display()
            )));
        }
        let start = self.position_window(relative)?;
        Ok(&self.window[start..start + self.record_len])
    }

    /// Write a record at an absolute offset, zero padding it to the record length
    pub fn write_record(&mut self, offset: u64, bytes: &[u8]) -> SpatialResult<()> {
        if bytes.len() > self.record_len {
            return Err(SpatialError::Invariant(format!(
                "record of {} bytes does not fit slot of {} bytes",
                bytes.len(),
                self.record_len
            )));
        }
        let relative = self.relative(offset)?;
        let start = self.position_window(relative)?;
        let end = start + self.record_len;

        self.window[start..start + bytes.len()].copy_from_slice(bytes);
        self.window[start + bytes.len()..end].fill(0);
        self.dirty = Some(match self.dirty.take() {
            Some(range) => range.start.min(start)..range.end.max(end),
            None => start..end,
        });
        self.data_len = self.data_len.max(relative + self.record_len as u64);
        Ok(())
    }

    /// Read `len` bytes from the start of the file, bypassing the window
    pub fn read_prefix(&mut self, len: usize) -> SpatialResult<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.file
            .seek(SeekFrom::Start(0))
            .io_context("seek header", 0)?;
        self.file
            .read_exact(&mut buffer)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => SpatialError::CorruptStore(format!(
                    "{} is too short to hold a header",
                    self.path.display()
                )),
                _ => SpatialError::Io {
                    operation: "read header",
                    offset: 0,
                    source: e,
                },
            })?;
        Ok(buffer)
    }

    /// Write bytes at the start of the file, bypassing the window
    pub fn write_prefix(&mut self, bytes: &[u8]) -> SpatialResult<()> {
        if bytes.len() as u64 > self.base_offset {
            return Err(SpatialError::Invariant(format!(
                "prefix of {} bytes overlaps the record region at {}",
                bytes.len(),
                self.base_offset
            )));
        }
        self.file
            .seek(SeekFrom::Start(0))
            .io_context("seek header", 0)?;
        self.file.write_all(bytes).io_context("write header", 0)?;
        Ok(())
    }

    /// Write the dirty region of the window back to the file
    pub fn flush(&mut self) -> SpatialResult<()> {
        let (Some(start), Some(range)) = (self.window_start, self.dirty.take()) else {
            return Ok(());
        };
        let offset = self.base_offset + start + range.start as u64;
        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&self.window[range.clone()]))
            .io_context("write window", offset);

        match result {
            Ok(()) => {
                self.writes += 1;
                Ok(())
            }
            Err(e) => {
                // keep the bytes so a later flush can retry the write-back
                self.dirty = Some(range);
                Err(e)
            }
        }
    }

    pub fn sync(&mut self) -> SpatialResult<()> {
        self.flush()?;
        self.file.sync_all().io_context("sync file", 0)
    }

    /// Drop every record, keeping the prefix
    pub fn truncate(&mut self) -> SpatialResult<()> {
        self.window_start = None;
        self.dirty = None;
        self.data_len = 0;
        self.file
            .set_len(self.base_offset)
            .io_context("truncate file", self.base_offset)
    }

    fn relative(&self, offset: u64) -> SpatialResult<u64> {
        let relative = offset.checked_sub(self.base_offset).ok_or_else(|| {
            SpatialError::Invariant(format!(
                "offset {} precedes the record region at {}",
                offset, self.base_offset
            ))
        })?;
        if relative % self.record_len as u64 != 0 {
            return Err(SpatialError::Invariant(format!(
                "offset {} is not aligned to records of {} bytes",
                offset, self.record_len
            )));
        }
        Ok(relative)
    }

    /// Make sure the window covers `relative` and return its position in the window
    fn position_window(&mut self, relative: u64) -> SpatialResult<usize> {
        let window_len = self.window.len() as u64;
        if let Some(start) = self.window_start {
            if relative >= start && relative < start + window_len {
                return Ok((relative - start) as usize);
            }
        }

        self.flush()?;
        let start = relative / window_len * window_len;
        self.load_window(start)?;
        Ok((relative - start) as usize)
    }

    fn load_window(&mut self, start: u64) -> SpatialResult<()> {
        let available = self
            .data_len
            .saturating_sub(start)
            .min(self.window.len() as u64) as usize;
        let offset = self.base_offset + start;

        // a failed load must not leave stale bytes mapped to the new start
        self.window_start = None;
        if available > 0 {
            self.file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.read_exact(&mut self.window[..available]))
                .io_context("read window", offset)?;
            self.reads += 1;
        }
        self.window[available..].fill(0);
        self.window_start = Some(start);
        Ok(())
    }
}
