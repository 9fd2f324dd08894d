//! I/O abstractions for reading and rewriting ZIP archives.
//!
//! This module provides a unified interface for random-access byte storage,
//! allowing the engine to work with local files, in-memory buffers and
//! remote HTTP sources through one seam.
//!
//! ## Architecture
//!
//! The core abstraction is the [`ByteSource`] trait: a seekable cursor over
//! a backing store with a read half that every source implements and a write
//! half that only writable sources provide. The engine never hands a source
//! to two operations at once; the archive serializes access behind its own
//! lock, so sources carry a single cursor rather than positioned-read
//! plumbing.
//!
//! ## Implementations
//!
//! - [`FileSource`]: random access over a regular file, readable and
//!   writable
//! - [`MemorySource`]: growable byte buffer with identical semantics
//! - [`HttpSource`]: read-only access to a remote archive using HTTP Range
//!   requests

mod file;
mod http;
mod memory;

pub use file::FileSource;
pub use http::HttpSource;
pub use memory::MemorySource;

use async_trait::async_trait;

use crate::error::{Result, ZipError};

/// Random-access byte storage underneath an archive.
///
/// The read half (`len`, `position`, `seek`, `read`) is mandatory. The
/// write half defaults to failing with [`ZipError::UnwritableArchive`];
/// writable sources override it and report `is_writable() == true`.
///
/// The source is a pure byte layer: it never interprets ZIP structures.
#[async_trait]
pub trait ByteSource: Send {
    /// Current total length of the backing store in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cursor offset.
    fn position(&self) -> u64;

    /// Move the cursor. Seeking past the end is allowed; the next read
    /// returns 0 bytes and a write extends the store.
    fn seek(&mut self, offset: u64);

    /// Read up to `buf.len()` bytes at the cursor, advancing it.
    /// Returns the number of bytes read; 0 means end of store.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn is_writable(&self) -> bool {
        false
    }

    /// Write all of `data` at the cursor, advancing it and growing the
    /// store as needed.
    async fn write(&mut self, _data: &[u8]) -> Result<()> {
        Err(ZipError::UnwritableArchive)
    }

    /// Shrink (or grow) the store to exactly `len` bytes.
    async fn truncate(&mut self, _len: u64) -> Result<()> {
        Err(ZipError::UnwritableArchive)
    }

    /// Push buffered bytes to durable storage.
    async fn flush(&mut self) -> Result<()> {
        Err(ZipError::UnwritableArchive)
    }
}

/// Read exactly `len` bytes at the cursor, failing on a short read.
pub(crate) async fn read_exact(source: &mut dyn ByteSource, len: usize) -> Result<Vec<u8>> {
    let buf = read_up_to(source, len).await?;
    if buf.len() != len {
        return Err(ZipError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("wanted {len} bytes, got {}", buf.len()),
        )));
    }
    Ok(buf)
}

/// Read up to `len` bytes at the cursor, stopping early at end of store.
pub(crate) async fn read_up_to(source: &mut dyn ByteSource, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Write a large buffer in `buffer_size` slices so no single write call
/// has to materialize the whole region twice.
pub(crate) async fn write_chunked(
    source: &mut dyn ByteSource,
    data: &[u8],
    buffer_size: usize,
) -> Result<()> {
    if buffer_size == 0 {
        return Err(ZipError::InvalidBufferSize);
    }
    for chunk in data.chunks(buffer_size) {
        source.write(chunk).await?;
    }
    Ok(())
}
