//! Buffered append writers with logical position tracking.
//!
//! Every on-disk integer is little-endian; variable-length fields use the
//! varint form from [`super::varint`]. `FileWriter` is the only way index
//! and staging files are produced, so the whole format funnels through it.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use super::varint::{write_varint, write_varint_to};
use crate::{Error, Result};

const WRITE_BUFFER_SIZE: usize = 1 << 20;

/// Append-only buffered file writer.
///
/// Tracks the logical write position (buffered bytes included) so callers can
/// record offsets without flushing. Staging files can be marked temporary;
/// they are unlinked when the writer is dropped.
pub struct FileWriter {
    inner: BufWriter<File>,
    path: PathBuf,
    pos: u64,
    temporary: bool,
}

impl FileWriter {
    /// Create (or truncate) a file for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            inner: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            path,
            pos: 0,
            temporary: false,
        })
    }

    /// Open an existing file for in-place patching (no truncation).
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            inner: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            path,
            pos: 0,
            temporary: false,
        })
    }

    /// Unlink the file when this writer is dropped.
    pub fn mark_temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical write position, counting still-buffered bytes.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.inner
            .write_all(data)
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos += data.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.inner
            .write_u8(value)
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos += 1;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.inner
            .write_u32::<LittleEndian>(value)
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos += 4;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.inner
            .write_u64::<LittleEndian>(value)
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos += 8;
        Ok(())
    }

    pub fn pack_u32(&mut self, value: u32) -> Result<()> {
        self.pack_u64(value as u64)
    }

    pub fn pack_u64(&mut self, value: u64) -> Result<()> {
        let before = super::varint::packed_len(value) as u64;
        write_varint_to(&mut self.inner, value).map_err(|e| Error::io(&self.path, e))?;
        self.pos += before;
        Ok(())
    }

    /// Varint byte length followed by the raw bytes.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.pack_u64(s.len() as u64)?;
        self.write_all(s.as_bytes())
    }

    /// Raw little-endian words, no length prefix.
    pub fn write_u32_slice(&mut self, words: &[u32]) -> Result<()> {
        for &w in words {
            self.write_u32(w)?;
        }
        Ok(())
    }

    /// Varint word count + raw little-endian words (the `len32` form).
    pub fn write_len32_words(&mut self, words: &[u32]) -> Result<()> {
        self.pack_u32(words.len() as u32)?;
        self.write_u32_slice(words)
    }

    /// Append the whole contents of another file at the current position.
    pub fn append_file(&mut self, path: impl AsRef<Path>) -> Result<u64> {
        let src = path.as_ref();
        let mut file = File::open(src).map_err(|e| Error::io(src, e))?;
        let copied = io::copy(&mut file, &mut self.inner).map_err(|e| Error::io(src, e))?;
        self.pos += copied;
        Ok(copied)
    }

    /// Flush and reposition the underlying file. Subsequent writes overwrite
    /// in place; the logical position restarts at `offset`.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner.flush().map_err(|e| Error::io(&self.path, e))?;
        self.inner
            .get_mut()
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos = offset;
        Ok(())
    }

    /// Flush buffered data to the OS. The file stays open.
    pub fn finish(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| Error::io(&self.path, e))
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        let _ = self.inner.flush();
        if self.temporary {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// In-memory writer over a byte buffer, used to stage a block's packed
/// posting payloads before they hit the file.
pub struct MemWriter<'a> {
    data: &'a mut Vec<u8>,
}

impl<'a> MemWriter<'a> {
    pub fn new(data: &'a mut Vec<u8>) -> Self {
        Self { data }
    }

    pub fn pos(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn write_all(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn pack_u32(&mut self, value: u32) {
        write_varint(self.data, value as u64);
    }

    pub fn pack_u64(&mut self, value: u64) {
        write_varint(self.data, value);
    }

    /// Varint word count + raw little-endian words (the `len32` form).
    pub fn write_len32_words(&mut self, words: &[u32]) {
        self.pack_u32(words.len() as u32);
        for &w in words {
            self.write_u32(w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn positions_track_buffered_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let mut w = FileWriter::create(&path).unwrap();
        w.write_u32(7).unwrap();
        assert_eq!(w.pos(), 4);
        w.write_u64(9).unwrap();
        assert_eq!(w.pos(), 12);
        w.pack_u64(300).unwrap();
        assert_eq!(w.pos(), 14);
        w.finish().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 14);
    }

    #[test]
    fn seek_patches_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("patch.bin");
        {
            let mut w = FileWriter::create(&path).unwrap();
            w.write_u64(0).unwrap();
            w.write_u64(0xdead).unwrap();
            w.finish().unwrap();
        }
        {
            let mut w = FileWriter::open_rw(&path).unwrap();
            w.seek(0).unwrap();
            w.write_u64(42).unwrap();
            w.finish().unwrap();
        }
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(u64::from_le_bytes(data[..8].try_into().unwrap()), 42);
        assert_eq!(u64::from_le_bytes(data[8..].try_into().unwrap()), 0xdead);
    }

    #[test]
    fn temporary_files_vanish_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("staging.tmp");
        {
            let mut w = FileWriter::create(&path).unwrap().mark_temporary();
            w.write_u32(1).unwrap();
            w.finish().unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn mem_writer_len32() {
        let mut buf = Vec::new();
        let mut w = MemWriter::new(&mut buf);
        w.write_len32_words(&[1, 2]);
        // varint(2) + two LE words
        assert_eq!(buf, vec![2, 1, 0, 0, 0, 2, 0, 0, 0]);
    }
}
