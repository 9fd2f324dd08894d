//! In-memory byte source backed by a growable buffer.

use async_trait::async_trait;

use super::ByteSource;
use crate::error::{Result, ZipError};

/// Byte source over a `Vec<u8>`, behaving like [`FileSource`] in every
/// observable way so tests and in-memory archives share the engine code
/// path with files.
///
/// [`FileSource`]: super::FileSource
pub struct MemorySource {
    data: Vec<u8>,
    position: u64,
    writable: bool,
}

impl MemorySource {
    pub fn new(data: Vec<u8>, writable: bool) -> Self {
        Self {
            data,
            position: 0,
            writable,
        }
    }

    /// Borrow the current archive bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the source, returning the archive bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = (self.position as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(ZipError::UnwritableArchive);
        }
        let start = self.position as usize;
        let end = start + data.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        self.position = end as u64;
        Ok(())
    }

    async fn truncate(&mut self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(ZipError::UnwritableArchive);
        }
        self.data.resize(len as usize, 0);
        self.position = self.position.min(len);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Err(ZipError::UnwritableArchive);
        }
        Ok(())
    }
}
