//! Removing entries by rewriting into a sidecar archive.
//!
//! Central directory records point at local headers by absolute offset,
//! so entries cannot simply be spliced out. Remove copies every surviving
//! `[local header .. data .. descriptor]` region verbatim into a fresh
//! archive, re-emits the directory with rebased offsets, and atomically
//! replaces the original. A failure at any point discards the sidecar and
//! leaves the original untouched.
//!
//! Encrypted entries, which enumeration hides, are still copied: they
//! survive as opaque byte regions.

use std::path::{Path, PathBuf};

use super::DEFAULT_BUFFER_SIZE;
use super::add::write_tail;
use super::archive::{AccessMode, Archive, ArchiveInner};
use super::entry::Entry;
use super::structures::{
    CentralDirectoryHeader, EndOfCentralDirectory, U32_SENTINEL, VERSION_NEEDED_DEFAULT,
    VERSION_NEEDED_ZIP64, Zip64ExtraField, remove_extra_field,
};
use crate::error::{Result, ZipError};
use crate::io::{self, ByteSource, FileSource, MemorySource};
use crate::progress::Progress;

/// Knobs for [`Archive::remove`].
#[derive(Debug, Clone)]
pub struct RemoveOptions {
    pub buffer_size: usize,
    pub progress: Option<Progress>,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress: None,
        }
    }
}

impl Archive<FileSource> {
    /// Remove `entry`, rewriting the archive through a sibling temp file
    /// that replaces the original with an atomic rename on success.
    pub async fn remove(&self, entry: &Entry, opts: RemoveOptions) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.require_writable()?;

        let path = inner
            .backing_path
            .clone()
            .ok_or(ZipError::UnwritableArchive)?;
        let temp_path = sidecar_path(&path);

        let mut target = FileSource::open(&temp_path, AccessMode::Create)?;
        let result = rewrite_without(&mut inner, &mut target, entry, &opts).await;
        drop(target);

        match result {
            Ok(()) => {
                std::fs::rename(&temp_path, &path)?;
                inner.source = FileSource::open(&path, AccessMode::Update)?;
                inner.invalidate_caches();
                inner.load_tail().await?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

impl Archive<MemorySource> {
    /// Remove `entry`, rewriting into a fresh buffer that replaces the
    /// archive's backing store on success.
    pub async fn remove(&self, entry: &Entry, opts: RemoveOptions) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.require_writable()?;

        let mut target = MemorySource::new(Vec::new(), true);
        rewrite_without(&mut inner, &mut target, entry, &opts).await?;

        inner.source = target;
        inner.invalidate_caches();
        inner.load_tail().await?;
        Ok(())
    }
}

/// A unique sibling of `path` for the rewrite. Mutations on one archive
/// are serialized, so the process id is enough to avoid collisions.
fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.ziptmp", std::process::id()));
    path.with_file_name(name)
}

/// Copy every entry except `removed` into `target` and emit a fresh
/// directory and tail behind them.
async fn rewrite_without<S: ByteSource>(
    inner: &mut ArchiveInner<S>,
    target: &mut dyn ByteSource,
    removed: &Entry,
    opts: &RemoveOptions,
) -> Result<()> {
    let buffer_size = opts.buffer_size;
    if buffer_size == 0 {
        return Err(ZipError::InvalidBufferSize);
    }

    // Create-mode ceremony: a minimal EOCD, overwritten by the first
    // copied entry (or kept, when the last entry is being removed).
    target.seek(0);
    target.write(&EndOfCentralDirectory::empty().encode()).await?;
    target.seek(0);

    // Work from the raw directory records: enumeration hides encrypted
    // entries, but they must survive a rewrite.
    let (cd_offset, cd_size, total) = inner.cd_location();
    inner.source.seek(cd_offset);
    let cd = io::read_exact(&mut inner.source, cd_size as usize).await?;

    let mut records = Vec::with_capacity(total as usize);
    let mut cursor = 0usize;
    let mut found = false;
    for _ in 0..total {
        let header = CentralDirectoryHeader::parse(&cd[cursor..])?;
        cursor += header.encoded_len();
        let parsed = Entry::from_header(header, inner.encoding);
        if parsed.local_header_offset() == removed.local_header_offset() {
            found = true;
        } else {
            records.push(parsed);
        }
    }
    if !found {
        return Err(ZipError::LocalHeaderNotFound(removed.local_header_offset()));
    }

    if let Some(progress) = &opts.progress {
        let copied_total: u64 = records.iter().map(|e| e.compressed_size()).sum();
        progress.set_total(copied_total);
    }

    // Copy surviving regions in directory order, rebasing each record's
    // offset to wherever its block lands in the target.
    let mut new_records = Vec::with_capacity(records.len());
    for entry in &records {
        if opts.progress.as_ref().is_some_and(Progress::is_cancelled) {
            return Err(ZipError::CancelledOperation);
        }

        let local = inner.load_local_header(entry).await?;
        let block_len = local.header.encoded_len() as u64
            + entry.compressed_size()
            + local
                .descriptor
                .as_ref()
                .map(|d| d.encoded_len() as u64)
                .unwrap_or(0);

        let new_offset = target.position();
        copy_region(
            inner,
            target,
            entry.local_header_offset(),
            block_len,
            buffer_size,
            opts.progress.as_ref(),
        )
        .await?;

        new_records.push(rebase_record(entry.header().clone(), new_offset, inner));
    }

    let cd_start = target.position();
    let mut new_cd_size = 0u64;
    for record in &new_records {
        let encoded = record.encode();
        new_cd_size += encoded.len() as u64;
        io::write_chunked(target, &encoded, buffer_size).await?;
    }

    write_tail(
        target,
        inner.limits,
        cd_start,
        new_cd_size,
        new_records.len() as u64,
        inner.eocd.comment.clone(),
    )
    .await?;

    let end = target.position();
    target.truncate(end).await?;
    target.flush().await?;
    Ok(())
}

async fn copy_region<S: ByteSource>(
    inner: &mut ArchiveInner<S>,
    target: &mut dyn ByteSource,
    offset: u64,
    len: u64,
    buffer_size: usize,
    progress: Option<&Progress>,
) -> Result<()> {
    inner.source.seek(offset);
    let mut remaining = len;
    while remaining > 0 {
        let chunk_len = remaining.min(buffer_size as u64) as usize;
        let chunk = io::read_exact(&mut inner.source, chunk_len).await?;
        target.write(&chunk).await?;
        remaining -= chunk_len as u64;
        if let Some(progress) = progress {
            progress.add_completed(chunk_len as u64);
        }
    }
    Ok(())
}

/// Point a directory record at `new_offset`, promoting it to (or
/// demoting it from) the ZIP64 extra as the new value requires. Size
/// promotion is untouched; sizes do not change on remove.
fn rebase_record<S>(
    mut header: CentralDirectoryHeader,
    new_offset: u64,
    inner: &ArchiveInner<S>,
) -> CentralDirectoryHeader {
    let limits = inner.limits;
    let existing = header.zip64_extra().unwrap_or_default();

    let mut zip64 = Zip64ExtraField {
        uncompressed_size: if header.uncompressed_size == U32_SENTINEL {
            existing.uncompressed_size
        } else {
            None
        },
        compressed_size: if header.compressed_size == U32_SENTINEL {
            existing.compressed_size
        } else {
            None
        },
        local_header_offset: None,
        disk_number_start: None,
    };

    if new_offset >= limits.field32 {
        header.local_header_offset = U32_SENTINEL;
        zip64.local_header_offset = Some(new_offset);
    } else {
        header.local_header_offset = new_offset as u32;
    }

    let mut extra = remove_extra_field(&header.extra_field, Zip64ExtraField::HEADER_ID);
    if !zip64.is_empty() {
        extra.extend_from_slice(&zip64.encode());
        header.version_needed = header.version_needed.max(VERSION_NEEDED_ZIP64);
    } else if header.version_needed == VERSION_NEEDED_ZIP64 {
        header.version_needed = VERSION_NEEDED_DEFAULT;
    }
    header.extra_field = extra;
    header
}
