//! Local filesystem byte source with random access support.

use std::fs::{File, OpenOptions};
use std::path::Path;

use async_trait::async_trait;

use super::ByteSource;
use crate::error::Result;
use crate::zip::AccessMode;

/// Byte source over a regular file.
///
/// Uses platform-specific positioned I/O where available:
///
/// - **Unix**: `pread(2)`/`pwrite(2)` via `FileExt`, which access an offset
///   without touching the kernel file position
/// - **Other platforms**: seek + read/write on a borrowed handle
///
/// The total length is computed on open and maintained across writes and
/// truncates, so `len()` never needs a syscall.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
    position: u64,
    writable: bool,
}

impl FileSource {
    /// Open `path` according to `mode`.
    ///
    /// - [`AccessMode::Read`]: the file must exist; the source is read-only.
    /// - [`AccessMode::Create`]: the file must not exist yet
    ///   (`AlreadyExists` otherwise); the source is writable.
    /// - [`AccessMode::Update`]: the file must exist; the source is
    ///   writable.
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let file = match mode {
            AccessMode::Read => OpenOptions::new().read(true).open(path)?,
            AccessMode::Create => OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)?,
            AccessMode::Update => OpenOptions::new().read(true).write(true).open(path)?,
        };
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            position: 0,
            writable: mode.is_writable(),
        })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        #[cfg(unix)]
        let n = {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, self.position)?
        };

        #[cfg(not(unix))]
        let n = {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(self.position))?;
            file.read(buf)?
        };

        self.position += n as u64;
        Ok(n)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(crate::error::ZipError::UnwritableArchive);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.write_all_at(data, self.position)?;
        }

        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(self.position))?;
            file.write_all(data)?;
        }

        self.position += data.len() as u64;
        self.len = self.len.max(self.position);
        Ok(())
    }

    async fn truncate(&mut self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(crate::error::ZipError::UnwritableArchive);
        }
        self.file.set_len(len)?;
        self.len = len;
        self.position = self.position.min(len);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Err(crate::error::ZipError::UnwritableArchive);
        }
        self.file.sync_all()?;
        Ok(())
    }
}
