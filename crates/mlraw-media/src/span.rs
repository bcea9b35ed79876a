//! A numbered file series seen as one contiguous byte range.

use mlraw_core::{RawError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

struct SpanFile {
    path: PathBuf,
    file: Mutex<File>,
    start: u64,
    len: u64,
}

/// Flattens an ordered list of files into one seekable address space.
///
/// Reads that straddle a file boundary are stitched together transparently.
/// Each file has its own lock, so concurrent reads of different chunks do
/// not contend.
pub struct SpanningByteStore {
    files: Vec<SpanFile>,
    total_len: u64,
}

impl SpanningByteStore {
    /// Open every file of the series, in order.
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::with_capacity(paths.len());
        let mut start = 0u64;
        for path in paths {
            let file = File::open(path)?;
            let len = file.metadata()?.len();
            debug!(path = %path.display(), len, start, "Span file");
            files.push(SpanFile {
                path: path.clone(),
                file: Mutex::new(file),
                start,
                len,
            });
            start += len;
        }
        Ok(Self {
            files,
            total_len: start,
        })
    }

    /// Total bytes across all files.
    pub fn len(&self) -> u64 {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Path and length of file `index`.
    pub fn file(&self, index: usize) -> Option<(&Path, u64)> {
        self.files.get(index).map(|f| (f.path.as_path(), f.len))
    }

    /// Read up to `len` bytes at logical `offset`. Returns fewer bytes only
    /// when the series ends first.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        let mut remaining = len as u64;

        for f in &self.files {
            if remaining == 0 {
                break;
            }
            let end = f.start + f.len;
            if pos >= end {
                continue;
            }
            let local = pos - f.start;
            let take = remaining.min(f.len - local);
            let mut file = f.file.lock();
            file.seek(SeekFrom::Start(local))?;
            let got = file.by_ref().take(take).read_to_end(&mut out)? as u64;
            pos += got;
            remaining -= got;
            if got < take {
                // File shrank under us; treat the rest as missing.
                break;
            }
        }
        Ok(out)
    }

    /// Read exactly `len` bytes at `offset`, failing with `Truncated` when
    /// the series is shorter.
    pub fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.read_at(offset, len)?;
        if data.len() < len {
            return Err(RawError::Truncated {
                expected: len,
                available: data.len(),
            });
        }
        Ok(data)
    }

    /// Read up to `len` bytes at `offset` within file `file_index` only.
    pub fn read_in_file(&self, file_index: usize, offset: u64, len: usize) -> Result<Vec<u8>> {
        let Some(f) = self.files.get(file_index) else {
            return Err(RawError::OutOfRange {
                index: file_index,
                count: self.files.len(),
            });
        };
        let take = (len as u64).min(f.len.saturating_sub(offset));
        let mut out = Vec::with_capacity(take as usize);
        let mut file = f.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.by_ref().take(take).read_to_end(&mut out)?;
        Ok(out)
    }

    /// Bytes of fixed-size frame `index` in a series of `frame_count` frames.
    pub fn read_frame_bytes(
        &self,
        index: usize,
        frame_size: usize,
        frame_count: usize,
    ) -> Result<Vec<u8>> {
        if index >= frame_count {
            return Err(RawError::OutOfRange {
                index,
                count: frame_count,
            });
        }
        self.read_exact_at(index as u64 * frame_size as u64, frame_size)
    }
}
