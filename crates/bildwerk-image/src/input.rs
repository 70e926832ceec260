// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Input file — seekable byte input shared by the sniffer, the decoders and
// the streaming data sources.

use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use bildwerk_core::error::{BildwerkError, Result};
use tracing::{debug, instrument};

trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// A named, seekable image input.
///
/// Short reads surface as [`BildwerkError::CorruptFormat`] so decoders can
/// treat a truncated file the same way as malformed content.
pub struct InputFile {
    name: String,
    inner: Box<dyn ReadSeek>,
    size: u64,
}

impl std::fmt::Debug for InputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

impl InputFile {
    // -- Construction ---------------------------------------------------------

    /// Open a file on disk.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        debug!(size, "Opened image file");
        Ok(Self {
            name: path.display().to_string(),
            inner: Box::new(BufReader::new(file)),
            size,
        })
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            name: name.into(),
            inner: Box::new(Cursor::new(bytes)),
            size,
        }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    // -- Positioning ----------------------------------------------------------

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        let count = i64::try_from(count)
            .map_err(|_| BildwerkError::CorruptFormat(format!("skip of {count} bytes")))?;
        self.inner.seek(SeekFrom::Current(count))?;
        Ok(())
    }

    pub fn at_eof(&mut self) -> Result<bool> {
        Ok(self.tell()? >= self.size)
    }

    // -- Reading --------------------------------------------------------------

    /// Read up to `buf.len()` bytes; returns 0 only at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Fill `buf` completely or fail with a truncation error.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                BildwerkError::CorruptFormat(format!("{}: unexpected end of file", self.name))
            } else {
                err.into()
            }
        })
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read `len` bytes into a freshly allocated buffer.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = crate::alloc_zeroed(len, "input buffer")?;
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read the whole file from the start.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.size)
            .map_err(|_| BildwerkError::exhausted("input file", usize::MAX))?;
        self.seek(0)?;
        self.read_vec(len)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Little- and big-endian readers consume the right byte order.
    #[test]
    fn reads_integers_in_both_orders() {
        let mut file = InputFile::from_bytes("mem", vec![0x01, 0x02, 0x01, 0x02, 0xFF]);
        assert_eq!(file.read_u16_be().unwrap(), 0x0102);
        assert_eq!(file.read_u16_le().unwrap(), 0x0201);
        assert_eq!(file.read_u8().unwrap(), 0xFF);
        assert!(file.at_eof().unwrap());
    }

    /// A short read is reported as corrupt data, not a raw I/O error.
    #[test]
    fn truncated_read_is_corrupt() {
        let mut file = InputFile::from_bytes("short.bin", vec![1, 2]);
        let err = file.read_u32_le().unwrap_err();
        assert!(matches!(err, BildwerkError::CorruptFormat(_)));
        assert!(err.to_string().contains("short.bin"));
    }

    /// Files on disk report their size and can be re-read from the start.
    #[test]
    fn opens_file_on_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let mut file = InputFile::open(tmp.path()).unwrap();
        assert_eq!(file.size(), 11);
        file.skip(6).unwrap();
        assert_eq!(&file.read_array::<5>().unwrap(), b"world");
        assert_eq!(file.read_all().unwrap(), b"hello world");
    }

    /// Opening a missing file is an I/O failure.
    #[test]
    fn missing_file_is_io_failure() {
        let err = InputFile::open("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, BildwerkError::IoFailure(_)));
    }
}
