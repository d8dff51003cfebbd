//! Buffered file reading and typed memory-mapped views.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::mem::size_of;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;

use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 1 << 16;

/// Buffered reader over an owned file handle with logical position tracking.
///
/// Every merge run opens its own `FileReader` on the shared temp file, seeked
/// to the run's start; the run end is enforced by the caller.
pub struct FileReader {
    inner: BufReader<File>,
    path: PathBuf,
    pos: u64,
    len: u64,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let len = file.metadata().map_err(|e| Error::io(&path, e))?.len();
        Ok(Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, file),
            path,
            pos: 0,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Total file length at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos = offset;
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.inner.read_u8().map_err(|e| Error::io(&self.path, e))?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self
            .inner
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let v = self
            .inner
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::io(&self.path, e))?;
        self.pos += 8;
        Ok(v)
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let before = self.pos;
        let mut counting = CountingRead {
            inner: &mut self.inner,
            count: 0,
        };
        let v = super::varint::read_varint(&mut counting).map_err(|e| Error::io(&self.path, e))?;
        self.pos = before + counting.count;
        Ok(v)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_varint()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Invariant(format!("invalid utf-8 in {}: {e}", self.path.display())))
    }
}

struct CountingRead<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Value types that can be viewed directly from a mapped file.
pub trait MappedValue: Copy + 'static {}

impl MappedValue for u32 {}
impl MappedValue for u64 {}
impl MappedValue for i64 {}
impl MappedValue for f32 {}

/// Read-only typed view over a whole file.
///
/// The mapping is kept alive for the lifetime of the value; zero-length
/// files skip the mapping entirely and expose an empty slice.
pub struct MappedSlice<T: MappedValue> {
    mmap: Option<Mmap>,
    len: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: MappedValue> MappedSlice<T> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let byte_len = file.metadata().map_err(|e| Error::io(path, e))?.len() as usize;
        if byte_len == 0 {
            return Ok(Self {
                mmap: None,
                len: 0,
                _marker: std::marker::PhantomData,
            });
        }
        if byte_len % size_of::<T>() != 0 {
            return Err(Error::Invariant(format!(
                "{}: length {} not a multiple of element size {}",
                path.display(),
                byte_len,
                size_of::<T>()
            )));
        }
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(path, e))?;
        Ok(Self {
            mmap: Some(mmap),
            len: byte_len / size_of::<T>(),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.mmap {
            None => &[],
            Some(mmap) => {
                // Mappings are page-aligned, which satisfies any primitive
                // element alignment.
                unsafe { std::slice::from_raw_parts(mmap.as_ptr() as *const T, self.len) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mapped_u32_view() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vals.bin");
        let values: Vec<u32> = vec![3, 7, 11, 1 << 30];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&path, &bytes).unwrap();

        let mapped = MappedSlice::<u32>::open(&path).unwrap();
        assert_eq!(mapped.as_slice(), &values[..]);
    }

    #[test]
    fn mapped_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();
        let mapped = MappedSlice::<u64>::open(&path).unwrap();
        assert!(mapped.as_slice().is_empty());
    }

    #[test]
    fn mapped_rejects_ragged_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ragged.bin");
        std::fs::write(&path, [0u8; 6]).unwrap();
        assert!(MappedSlice::<u32>::open(&path).is_err());
    }

    #[test]
    fn reader_tracks_varint_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.bin");
        let mut bytes = Vec::new();
        crate::io::varint::write_varint(&mut bytes, 300);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let mut r = FileReader::open(&path).unwrap();
        assert_eq!(r.read_varint().unwrap(), 300);
        assert_eq!(r.pos(), 2);
        assert_eq!(r.read_u32().unwrap(), 7);
    }
}
