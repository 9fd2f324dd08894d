//! Archive core: opening, EOCD location and central directory iteration.
//!
//! ## Reading strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's tail
//! 2. If any EOCD field is a sentinel, read the ZIP64 locator and record
//! 3. Read the Central Directory to get metadata for all entries
//! 4. For extraction, read each entry's Local File Header and data
//!
//! The whole central directory is fetched in one read, which matters for
//! the HTTP source (a single Range request) and costs nothing for the
//! local ones.
//!
//! ## Serialization
//!
//! One archive owns one byte source with a single cursor. Every public
//! operation takes the archive mutex for its full duration, so concurrent
//! callers are linearized in arrival order and seeks never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::entry::{Entry, PathEncoding};
use super::structures::{
    CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, FLAG_DATA_DESCRIPTOR,
    FLAG_ENCRYPTED, LocalFileHeader, U16_SENTINEL, U32_SENTINEL, Zip64EndOfCentralDirectory,
    Zip64Locator,
};
use crate::error::{Result, ZipError};
use crate::io::{self, ByteSource, FileSource, HttpSource, MemorySource};

/// Maximum EOCD comment length, bounding the backward scan window.
const MAX_COMMENT_SIZE: u64 = 65535;

/// How an archive is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Existing archive, read-only operations.
    Read,
    /// New archive; the backing store must not exist yet. A minimal EOCD
    /// is written immediately.
    Create,
    /// Existing archive, mutating operations allowed.
    Update,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

/// Field-overflow thresholds driving ZIP64 promotion.
///
/// Production values are the format sentinels; tests lower them to force
/// promotion on small archives.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    /// Values at or above this go to the ZIP64 extra / EOCD.
    pub field32: u64,
    /// Entry counts at or above this go to the ZIP64 EOCD.
    pub entries16: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            field32: U32_SENTINEL as u64,
            entries16: U16_SENTINEL as u64,
        }
    }
}

/// A local file header together with the trailing data descriptor that
/// writable opens keep around for rewriting.
#[derive(Debug, Clone)]
pub(crate) struct CachedLocalHeader {
    pub header: LocalFileHeader,
    pub descriptor: Option<DataDescriptor>,
}

/// Parsed ZIP64 EOCD record and where it sits in the archive.
#[derive(Debug, Clone)]
pub(crate) struct Zip64Tail {
    pub record: Zip64EndOfCentralDirectory,
    pub record_offset: u64,
}

#[derive(Debug)]
pub(crate) struct ArchiveInner<S> {
    pub(crate) source: S,
    pub(crate) mode: AccessMode,
    pub(crate) encoding: PathEncoding,
    pub(crate) backing_path: Option<PathBuf>,
    pub(crate) eocd: EndOfCentralDirectory,
    pub(crate) eocd_offset: u64,
    pub(crate) zip64: Option<Zip64Tail>,
    pub(crate) entries: Option<Arc<Vec<Entry>>>,
    pub(crate) local_headers: HashMap<u64, CachedLocalHeader>,
    pub(crate) limits: Limits,
}

/// A ZIP archive over a random-access byte source.
///
/// The archive is safe to share across tasks; operations are serialized
/// internally. Mutating operations require [`AccessMode::Create`] or
/// [`AccessMode::Update`] and finish with a flush of the byte source, so a
/// successful return implies the bytes are durable.
#[derive(Debug)]
pub struct Archive<S: ByteSource> {
    pub(crate) inner: Mutex<ArchiveInner<S>>,
}

impl Archive<FileSource> {
    /// Open a file-backed archive with the default path encoding.
    pub async fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        Self::open_with_encoding(path, mode, PathEncoding::default()).await
    }

    /// Open a file-backed archive, choosing how legacy entry names are
    /// decoded.
    pub async fn open_with_encoding(
        path: impl AsRef<Path>,
        mode: AccessMode,
        encoding: PathEncoding,
    ) -> Result<Self> {
        let path = path.as_ref();
        let source = FileSource::open(path, mode)?;
        let inner = ArchiveInner::start(source, mode, encoding, Some(path.to_owned())).await?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}

impl Archive<HttpSource> {
    /// Open a remote archive over HTTP Range requests, read-only.
    pub async fn open_url(url: &str) -> Result<Self> {
        Self::open_url_with_encoding(url, PathEncoding::default()).await
    }

    pub async fn open_url_with_encoding(url: &str, encoding: PathEncoding) -> Result<Self> {
        let source = HttpSource::connect(url).await?;
        let inner = ArchiveInner::start(source, AccessMode::Read, encoding, None).await?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}

impl Archive<MemorySource> {
    /// Open an archive over an in-memory buffer.
    ///
    /// `data` is required for [`AccessMode::Read`] and
    /// [`AccessMode::Update`]; [`AccessMode::Create`] starts from an empty
    /// buffer and ignores `data`.
    pub async fn open_in_memory(data: Option<Vec<u8>>, mode: AccessMode) -> Result<Self> {
        let source = match mode {
            AccessMode::Create => MemorySource::new(Vec::new(), true),
            AccessMode::Read => {
                MemorySource::new(data.ok_or(ZipError::UnreadableArchive)?, false)
            }
            AccessMode::Update => {
                MemorySource::new(data.ok_or(ZipError::UnreadableArchive)?, true)
            }
        };
        let inner = ArchiveInner::start(source, mode, PathEncoding::default(), None).await?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// A copy of the current archive bytes.
    pub async fn bytes(&self) -> Vec<u8> {
        self.inner.lock().await.source.bytes().to_vec()
    }
}

impl<S: ByteSource> Archive<S> {
    /// All entries in central directory order.
    ///
    /// Enumeration is cached until the next mutating operation. Encrypted
    /// entries are omitted (with a logged warning); a corrupt record ends
    /// iteration early rather than failing the call.
    pub async fn entries(&self) -> Result<Vec<Entry>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.load_entries().await?.as_ref().clone())
    }

    /// The first entry whose path equals `path`. Duplicate paths are legal
    /// in ZIP; the first one wins.
    pub async fn get(&self, path: &str) -> Result<Option<Entry>> {
        let mut inner = self.inner.lock().await;
        let entries = inner.load_entries().await?;
        Ok(entries.iter().find(|e| e.path() == path).cloned())
    }

    /// The archive-level comment, preserved across updates.
    pub async fn comment(&self) -> Vec<u8> {
        self.inner.lock().await.eocd.comment.clone()
    }

    /// The mode this archive was opened with.
    pub async fn mode(&self) -> AccessMode {
        self.inner.lock().await.mode
    }

    /// Lower the ZIP64 promotion thresholds so tests can exercise the
    /// promotion paths on small archives.
    #[doc(hidden)]
    pub async fn force_limits(&self, field32: u64, entries16: u64) {
        let mut inner = self.inner.lock().await;
        inner.limits = Limits { field32, entries16 };
    }
}

impl<S: ByteSource> ArchiveInner<S> {
    async fn start(
        source: S,
        mode: AccessMode,
        encoding: PathEncoding,
        backing_path: Option<PathBuf>,
    ) -> Result<Self> {
        let mut inner = Self {
            source,
            mode,
            encoding,
            backing_path,
            eocd: EndOfCentralDirectory::empty(),
            eocd_offset: 0,
            zip64: None,
            entries: None,
            local_headers: HashMap::new(),
            limits: Limits::default(),
        };
        match mode {
            AccessMode::Create => inner.write_empty_archive().await?,
            AccessMode::Read | AccessMode::Update => inner.load_tail().await?,
        }
        Ok(inner)
    }

    async fn write_empty_archive(&mut self) -> Result<()> {
        let eocd = EndOfCentralDirectory::empty();
        self.source.seek(0);
        self.source.write(&eocd.encode()).await?;
        self.source.flush().await?;
        self.eocd = eocd;
        self.eocd_offset = 0;
        Ok(())
    }

    /// Locate and parse the EOCD plus any ZIP64 tail, then bounds-check
    /// the central directory they describe.
    pub(crate) async fn load_tail(&mut self) -> Result<()> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        self.eocd = eocd;
        self.eocd_offset = eocd_offset;
        self.zip64 = if self.eocd.is_zip64() {
            Some(self.read_zip64_tail().await?)
        } else {
            None
        };
        self.check_directory_bounds()?;
        Ok(())
    }

    async fn find_eocd(&mut self) -> Result<(EndOfCentralDirectory, u64)> {
        let len = self.source.len();
        if len < EndOfCentralDirectory::SIZE as u64 {
            return Err(ZipError::MissingEndOfCentralDirectoryRecord);
        }

        // Fast path: no archive comment, EOCD flush against the end.
        let offset = len - EndOfCentralDirectory::SIZE as u64;
        self.source.seek(offset);
        let buf = io::read_exact(&mut self.source, EndOfCentralDirectory::SIZE).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            return Ok((EndOfCentralDirectory::parse(&buf)?, offset));
        }

        // A comment pushes the EOCD inward; scan backward through the
        // largest window it could occupy.
        let window = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(len);
        let start = len - window;
        self.source.seek(start);
        let buf = io::read_exact(&mut self.source, window as usize).await?;

        for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::parse(&buf[i..])?;
                    return Ok((eocd, start + i as u64));
                }
            }
        }

        Err(ZipError::MissingEndOfCentralDirectoryRecord)
    }

    async fn read_zip64_tail(&mut self) -> Result<Zip64Tail> {
        let locator_offset = self
            .eocd_offset
            .checked_sub(Zip64Locator::SIZE as u64)
            .ok_or(ZipError::InvalidCentralDirectoryOffset)?;
        self.source.seek(locator_offset);
        let buf = io::read_exact(&mut self.source, Zip64Locator::SIZE).await?;
        let locator = Zip64Locator::parse(&buf)?;

        // The record must sit directly before its locator.
        let expected = locator_offset
            .checked_sub(Zip64EndOfCentralDirectory::SIZE as u64)
            .ok_or(ZipError::InvalidCentralDirectoryOffset)?;
        if locator.eocd64_offset != expected {
            return Err(ZipError::InvalidCentralDirectoryOffset);
        }

        self.source.seek(locator.eocd64_offset);
        let buf = io::read_exact(&mut self.source, Zip64EndOfCentralDirectory::SIZE).await?;
        let record = Zip64EndOfCentralDirectory::parse(&buf)?;

        Ok(Zip64Tail {
            record,
            record_offset: expected,
        })
    }

    fn check_directory_bounds(&self) -> Result<()> {
        let (cd_offset, cd_size, total) = self.cd_location();
        let cd_end_limit = self
            .zip64
            .as_ref()
            .map(|t| t.record_offset)
            .unwrap_or(self.eocd_offset);

        if cd_offset > cd_end_limit {
            return Err(ZipError::InvalidCentralDirectoryOffset);
        }
        if cd_size > cd_end_limit - cd_offset {
            return Err(ZipError::InvalidCentralDirectorySize);
        }
        // Each record is at least 46 bytes, which bounds both the claimed
        // count and the allocation it drives.
        if total > cd_size / CentralDirectoryHeader::SIZE as u64 {
            return Err(ZipError::InvalidCentralDirectoryEntryCount);
        }
        Ok(())
    }

    /// Central directory (offset, size, entry count), honoring ZIP64.
    pub(crate) fn cd_location(&self) -> (u64, u64, u64) {
        match &self.zip64 {
            Some(tail) => (
                tail.record.cd_offset,
                tail.record.cd_size,
                tail.record.total_entries,
            ),
            None => (
                self.eocd.cd_offset as u64,
                self.eocd.cd_size as u64,
                self.eocd.total_entries as u64,
            ),
        }
    }

    pub(crate) async fn load_entries(&mut self) -> Result<Arc<Vec<Entry>>> {
        if let Some(entries) = &self.entries {
            return Ok(entries.clone());
        }

        let (cd_offset, cd_size, total) = self.cd_location();
        self.source.seek(cd_offset);
        let cd = io::read_exact(&mut self.source, cd_size as usize).await?;

        let mut entries = Vec::with_capacity(total as usize);
        let mut cursor = 0usize;
        let mut parsed = 0u64;
        while parsed < total {
            match CentralDirectoryHeader::parse(&cd[cursor..]) {
                Ok(header) => {
                    cursor += header.encoded_len();
                    parsed += 1;
                    if header.flags & FLAG_ENCRYPTED != 0 {
                        log::warn!(
                            "omitting encrypted entry {:?}",
                            String::from_utf8_lossy(&header.file_name)
                        );
                        continue;
                    }
                    entries.push(Entry::from_header(header, self.encoding));
                }
                Err(_) => {
                    log::warn!("central directory unreadable after {parsed} of {total} records");
                    break;
                }
            }
        }

        let entries = Arc::new(entries);
        self.entries = Some(entries.clone());
        Ok(entries)
    }

    /// Load (and cache) the local file header behind an entry. In writable
    /// modes a bit-3 entry's trailing data descriptor is loaded along with
    /// it so a later rewrite can reproduce it.
    pub(crate) async fn load_local_header(&mut self, entry: &Entry) -> Result<CachedLocalHeader> {
        let offset = entry.local_header_offset();
        if let Some(cached) = self.local_headers.get(&offset) {
            return Ok(cached.clone());
        }
        if offset + LocalFileHeader::SIZE as u64 > self.source.len() {
            return Err(ZipError::LocalHeaderNotFound(offset));
        }

        self.source.seek(offset);
        let fixed = io::read_exact(&mut self.source, LocalFileHeader::SIZE).await?;
        let tail_len =
            LocalFileHeader::tail_len(&fixed).ok_or(ZipError::LocalHeaderNotFound(offset))?;
        let tail = io::read_exact(&mut self.source, tail_len).await?;

        let mut full = fixed;
        full.extend_from_slice(&tail);
        let header = LocalFileHeader::parse(&full)?;

        let descriptor = if self.mode.is_writable() && header.flags & FLAG_DATA_DESCRIPTOR != 0 {
            let descriptor_offset =
                offset + header.encoded_len() as u64 + entry.compressed_size();
            self.source.seek(descriptor_offset);
            let max = DataDescriptor::SIGNATURE.len() + if entry.is_zip64() { 20 } else { 12 };
            let bytes = io::read_up_to(&mut self.source, max).await?;
            Some(DataDescriptor::parse(&bytes, entry.is_zip64())?)
        } else {
            None
        };

        let cached = CachedLocalHeader { header, descriptor };
        self.local_headers.insert(offset, cached.clone());
        Ok(cached)
    }

    /// Offset of the first data byte of an entry, bounds-checked against
    /// the source.
    pub(crate) async fn entry_data_offset(&mut self, entry: &Entry) -> Result<u64> {
        let local = self.load_local_header(entry).await?;
        let data_offset = entry.local_header_offset() + local.header.encoded_len() as u64;
        if data_offset > self.source.len()
            || entry.compressed_size() > self.source.len() - data_offset
        {
            return Err(ZipError::InvalidLocalHeaderDataOffset);
        }
        Ok(data_offset)
    }

    /// Drop the entry list and local header caches after a mutation.
    pub(crate) fn invalidate_caches(&mut self) {
        self.entries = None;
        self.local_headers.clear();
    }

    pub(crate) fn require_writable(&self) -> Result<()> {
        if !self.mode.is_writable() || !self.source.is_writable() {
            return Err(ZipError::UnwritableArchive);
        }
        Ok(())
    }
}
