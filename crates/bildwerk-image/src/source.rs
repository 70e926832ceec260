// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data sources — pull-based producers of the sample bytes of one strip.
//
// The object writer drives a source with `init`, repeated `fill` until it
// returns `None`, then exactly one `terminate`. Every source owns whatever it
// reads from, so dropping a slot releases its files and buffers.

use bildwerk_core::error::Result;
use tracing::trace;

use crate::input::InputFile;

/// Block size used when streaming straight from a file.
pub const BLOCK_SIZE: usize = 8192;

/// Producer of one strip's bytes, chunk by chunk.
pub trait DataSource {
    /// Prepare buffers and position any underlying reader.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next chunk, or `None` once the strip is exhausted.
    fn fill(&mut self) -> Result<Option<&[u8]>>;

    /// Release per-read state. Called once, after the last `fill`.
    fn terminate(&mut self) {}
}

/// Run `source` through its full protocol, handing every chunk to `sink`.
///
/// `terminate` runs even when `init`, `fill` or the sink fails.
pub fn pump(
    source: &mut dyn DataSource,
    mut sink: impl FnMut(&[u8]) -> Result<()>,
) -> Result<u64> {
    let result = (|| -> Result<u64> {
        source.init()?;
        let mut total = 0u64;
        while let Some(chunk) = source.fill()? {
            total += chunk.len() as u64;
            sink(chunk)?;
        }
        Ok(total)
    })();
    source.terminate();
    result
}

/// Collect a whole strip into memory.
pub fn drain(source: &mut dyn DataSource) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    pump(source, |chunk| {
        out.try_reserve(chunk.len())
            .map_err(|_| bildwerk_core::BildwerkError::exhausted("strip buffer", chunk.len()))?;
        out.extend_from_slice(chunk);
        Ok(())
    })?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// In-memory source
// ---------------------------------------------------------------------------

/// Serves an owned buffer in fixed-size chunks (typically one row).
pub struct MemorySource {
    data: Vec<u8>,
    chunk: usize,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            chunk: chunk.max(1),
            pos: 0,
        }
    }

    /// One chunk per row of `row_bytes`.
    pub fn rows(data: Vec<u8>, row_bytes: usize) -> Self {
        Self::new(data, row_bytes)
    }

    /// Fixed-size blocks, for compressed payloads.
    pub fn blocks(data: Vec<u8>) -> Self {
        Self::new(data, BLOCK_SIZE)
    }
}

impl DataSource for MemorySource {
    fn init(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn fill(&mut self) -> Result<Option<&[u8]>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk).min(self.data.len());
        let start = self.pos;
        self.pos = end;
        Ok(Some(&self.data[start..end]))
    }
}

// ---------------------------------------------------------------------------
// File region source
// ---------------------------------------------------------------------------

/// Streams a byte range of a file in [`BLOCK_SIZE`] blocks without holding
/// the whole payload in memory.
pub struct FileBlockSource {
    file: InputFile,
    start: u64,
    len: Option<u64>,
    remaining: u64,
    buf: Vec<u8>,
}

impl FileBlockSource {
    /// Stream from `start` to the end of the file.
    pub fn to_end(file: InputFile, start: u64) -> Self {
        Self {
            file,
            start,
            len: None,
            remaining: 0,
            buf: Vec::new(),
        }
    }

    /// Stream exactly `len` bytes from `start`.
    pub fn region(file: InputFile, start: u64, len: u64) -> Self {
        Self {
            file,
            start,
            len: Some(len),
            remaining: 0,
            buf: Vec::new(),
        }
    }
}

impl DataSource for FileBlockSource {
    fn init(&mut self) -> Result<()> {
        self.file.seek(self.start)?;
        self.remaining = self
            .len
            .unwrap_or_else(|| self.file.size().saturating_sub(self.start));
        self.buf = crate::alloc_zeroed(BLOCK_SIZE, "file block buffer")?;
        trace!(file = self.file.name(), start = self.start, remaining = self.remaining, "File source ready");
        Ok(())
    }

    fn fill(&mut self) -> Result<Option<&[u8]>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let want = usize::try_from(self.remaining).map_or(BLOCK_SIZE, |r| r.min(BLOCK_SIZE));
        let got = if self.len.is_some() {
            self.file.read_exact(&mut self.buf[..want])?;
            want
        } else {
            self.file.read(&mut self.buf[..want])?
        };
        if got == 0 {
            self.remaining = 0;
            return Ok(None);
        }
        self.remaining -= got as u64;
        Ok(Some(&self.buf[..got]))
    }

    fn terminate(&mut self) {
        self.buf = Vec::new();
    }
}
