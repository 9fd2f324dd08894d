//! Appending entries with the in-place update protocol.
//!
//! ZIP archives end in the central directory, so appending means
//! overwriting it: the new entry's local header goes where the directory
//! started (its bytes are snapshotted first), data streams through the
//! compressor, the header is rewritten with the real sizes, and the saved
//! directory plus one new record and a fresh EOCD are appended behind the
//! data. Cancellation or any mid-protocol failure truncates back to the
//! snapshot, restoring the archive byte for byte.
//!
//! Sizes are always known by the second header write, so entries created
//! here never use data descriptors.

use chrono::NaiveDateTime;

use super::DEFAULT_BUFFER_SIZE;
use super::archive::{Archive, ArchiveInner, Limits};
use super::codec::Deflater;
use super::entry::{EntryKind, datetime_to_dos};
use super::structures::{
    CentralDirectoryHeader, CompressionMethod, EndOfCentralDirectory, FLAG_UTF8, LocalFileHeader,
    U16_SENTINEL, U32_SENTINEL, VERSION_MADE_BY, VERSION_NEEDED_DEFAULT, VERSION_NEEDED_ZIP64,
    Zip64EndOfCentralDirectory, Zip64ExtraField, Zip64Locator,
};
use crate::error::{Result, ZipError};
use crate::io::{self, ByteSource};
use crate::progress::Progress;

/// Knobs for [`Archive::add_entry`].
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Ignored for directories and symlinks, which are always stored.
    pub compression_method: CompressionMethod,
    /// Entry modification time; defaults to now.
    pub modified: Option<NaiveDateTime>,
    /// POSIX permission bits; defaults to 0o644 for files and symlinks,
    /// 0o755 for directories.
    pub unix_permissions: Option<u32>,
    pub buffer_size: usize,
    pub progress: Option<Progress>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflate,
            modified: None,
            unix_permissions: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress: None,
        }
    }
}

/// Pre-operation tail state, kept in memory so a failed add can restore
/// the archive exactly.
struct Snapshot {
    /// Everything from the start of the central directory to the end of
    /// the archive: directory records, any ZIP64 tail, the EOCD.
    trailing: Vec<u8>,
    /// Length of the central directory records within `trailing`.
    cd_size: usize,
    cd_offset: u64,
    entry_count: u64,
    eocd_comment: Vec<u8>,
}

impl Snapshot {
    fn cd_bytes(&self) -> &[u8] {
        &self.trailing[..self.cd_size]
    }
}

impl<S: ByteSource> Archive<S> {
    /// Append one entry, pulling its data from `provider`.
    ///
    /// `provider` is called with `(position, chunk_size)` and must return
    /// exactly `chunk_size` bytes until `uncompressed_size` bytes have
    /// been produced. Directories take no data (`uncompressed_size` 0);
    /// a symlink's data is its target path as raw bytes.
    pub async fn add_entry<P>(
        &self,
        path: &str,
        kind: EntryKind,
        uncompressed_size: u64,
        opts: AddOptions,
        provider: P,
    ) -> Result<()>
    where
        P: FnMut(u64, usize) -> Result<Vec<u8>> + Send,
    {
        let mut inner = self.inner.lock().await;
        inner.require_writable()?;
        if opts.buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }
        if path.is_empty() || path.contains('\0') {
            return Err(ZipError::InvalidEntryPath(path.to_owned()));
        }

        let result = add_entry_locked(&mut inner, path, kind, uncompressed_size, &opts, provider)
            .await;
        match result {
            Ok(()) => {
                inner.invalidate_caches();
                inner.load_tail().await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn add_entry_locked<S, P>(
    inner: &mut ArchiveInner<S>,
    path: &str,
    kind: EntryKind,
    uncompressed_size: u64,
    opts: &AddOptions,
    provider: P,
) -> Result<()>
where
    S: ByteSource,
    P: FnMut(u64, usize) -> Result<Vec<u8>> + Send,
{
    let snapshot = take_snapshot(inner).await?;
    match run_protocol(inner, &snapshot, path, kind, uncompressed_size, opts, provider).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(rollback_err) = rollback(inner, &snapshot, opts.buffer_size).await {
                log::warn!("rollback after failed add also failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

async fn take_snapshot<S: ByteSource>(inner: &mut ArchiveInner<S>) -> Result<Snapshot> {
    let (cd_offset, cd_size, entry_count) = inner.cd_location();
    inner.source.seek(cd_offset);
    let trailing_len = inner.source.len() - cd_offset;
    let trailing = io::read_exact(&mut inner.source, trailing_len as usize).await?;
    Ok(Snapshot {
        trailing,
        cd_size: cd_size as usize,
        cd_offset,
        entry_count,
        eocd_comment: inner.eocd.comment.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_protocol<S, P>(
    inner: &mut ArchiveInner<S>,
    snapshot: &Snapshot,
    path: &str,
    kind: EntryKind,
    uncompressed_size: u64,
    opts: &AddOptions,
    mut provider: P,
) -> Result<()>
where
    S: ByteSource,
    P: FnMut(u64, usize) -> Result<Vec<u8>> + Send,
{
    let limits = inner.limits;

    // Directory entries carry a trailing slash; directories and symlinks
    // are never compressed.
    let stored_path = match kind {
        EntryKind::Directory if !path.ends_with('/') => format!("{path}/"),
        _ => path.to_owned(),
    };
    let method = match kind {
        EntryKind::File => opts.compression_method,
        EntryKind::Directory | EntryKind::Symlink => CompressionMethod::Stored,
    };
    if matches!(method, CompressionMethod::Unknown(_)) {
        return Err(ZipError::InvalidCompressionMethod(method.as_u16()));
    }

    let modified = opts
        .modified
        .unwrap_or_else(|| chrono::Local::now().naive_local());
    let (dos_date, dos_time) = datetime_to_dos(modified);

    // The local header's ZIP64 extra must have the same length on both
    // writes, so promotion is decided up front from the uncompressed
    // size; a promoted header reserves both size fields.
    let lfh_zip64 = uncompressed_size >= limits.field32;
    let lfh_start = snapshot.cd_offset;

    let make_lfh = |crc32: u32, compressed: u64| -> LocalFileHeader {
        let (extra, compressed32, uncompressed32) = if lfh_zip64 {
            let extra = Zip64ExtraField {
                uncompressed_size: Some(uncompressed_size),
                compressed_size: Some(compressed),
                local_header_offset: None,
                disk_number_start: None,
            };
            (extra.encode(), U32_SENTINEL, U32_SENTINEL)
        } else {
            (Vec::new(), compressed as u32, uncompressed_size as u32)
        };
        LocalFileHeader {
            version_needed: if lfh_zip64 {
                VERSION_NEEDED_ZIP64
            } else {
                VERSION_NEEDED_DEFAULT
            },
            flags: FLAG_UTF8,
            compression_method: method.as_u16(),
            last_mod_time: dos_time,
            last_mod_date: dos_date,
            crc32,
            compressed_size: compressed32,
            uncompressed_size: uncompressed32,
            file_name: stored_path.clone().into_bytes(),
            extra_field: extra,
        }
    };

    // Phase 1: placeholder header where the old central directory began.
    inner.source.seek(lfh_start);
    let placeholder = make_lfh(0, 0);
    inner.source.write(&placeholder.encode()).await?;

    if let Some(progress) = &opts.progress {
        progress.set_total(uncompressed_size);
    }

    // Phase 2: stream the entry data, tracking CRC and compressed size.
    let mut hasher = crc32fast::Hasher::new();
    let mut deflater = match method {
        CompressionMethod::Deflate => Some(Deflater::new()),
        _ => None,
    };
    let mut position = 0u64;
    let mut written_compressed = 0u64;
    let mut scratch = Vec::new();

    while position < uncompressed_size {
        if opts.progress.as_ref().is_some_and(Progress::is_cancelled) {
            return Err(ZipError::CancelledOperation);
        }
        let chunk_len = (uncompressed_size - position).min(opts.buffer_size as u64) as usize;
        let chunk = provider(position, chunk_len)?;
        if chunk.len() != chunk_len {
            return Err(ZipError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("provider returned {} of {chunk_len} bytes", chunk.len()),
            )));
        }
        hasher.update(&chunk);

        match &mut deflater {
            Some(deflater) => {
                scratch.clear();
                deflater.push(&chunk, &mut |compressed| {
                    scratch.extend_from_slice(compressed);
                    Ok(())
                })?;
                inner.source.write(&scratch).await?;
                written_compressed += scratch.len() as u64;
            }
            None => {
                inner.source.write(&chunk).await?;
                written_compressed += chunk.len() as u64;
            }
        }

        position += chunk_len as u64;
        if let Some(progress) = &opts.progress {
            progress.add_completed(chunk_len as u64);
        }
    }

    if let Some(deflater) = &mut deflater {
        scratch.clear();
        deflater.finish(&mut |compressed| {
            scratch.extend_from_slice(compressed);
            Ok(())
        })?;
        inner.source.write(&scratch).await?;
        written_compressed += scratch.len() as u64;
    }
    let crc32 = hasher.finalize();

    // A compressed stream that crosses the threshold without the
    // uncompressed size doing so would need a header layout we did not
    // reserve.
    if !lfh_zip64 && written_compressed >= limits.field32 {
        return Err(ZipError::InvalidEntrySize);
    }

    // Phase 3: rewrite the header with the real sizes and checksum.
    let new_cd_start = inner.source.position();
    inner.source.seek(lfh_start);
    let final_lfh = make_lfh(crc32, written_compressed);
    inner.source.write(&final_lfh.encode()).await?;

    // Phase 4: saved directory, the new record, then the tail.
    inner.source.seek(new_cd_start);
    io::write_chunked(&mut inner.source, snapshot.cd_bytes(), opts.buffer_size).await?;

    let cds = make_central_record(
        &stored_path,
        kind,
        method,
        crc32,
        written_compressed,
        uncompressed_size,
        lfh_start,
        (dos_date, dos_time),
        opts.unix_permissions,
        &limits,
    );
    inner.source.write(&cds.encode()).await?;

    let new_cd_size = snapshot.cd_size as u64 + cds.encoded_len() as u64;
    let new_entry_count = snapshot.entry_count + 1;
    write_tail(
        &mut inner.source,
        limits,
        new_cd_start,
        new_cd_size,
        new_entry_count,
        snapshot.eocd_comment.clone(),
    )
    .await?;

    let end = inner.source.position();
    inner.source.truncate(end).await?;
    inner.source.flush().await?;
    Ok(())
}

/// Build the central directory record for a freshly written entry,
/// promoting overflowing fields to a ZIP64 extra.
#[allow(clippy::too_many_arguments)]
fn make_central_record(
    stored_path: &str,
    kind: EntryKind,
    method: CompressionMethod,
    crc32: u32,
    compressed: u64,
    uncompressed: u64,
    lfh_offset: u64,
    dos_date_time: (u16, u16),
    unix_permissions: Option<u32>,
    limits: &Limits,
) -> CentralDirectoryHeader {
    let mut extra = Zip64ExtraField::default();
    let uncompressed32 = if uncompressed >= limits.field32 {
        extra.uncompressed_size = Some(uncompressed);
        U32_SENTINEL
    } else {
        uncompressed as u32
    };
    let compressed32 = if compressed >= limits.field32 {
        extra.compressed_size = Some(compressed);
        U32_SENTINEL
    } else {
        compressed as u32
    };
    let offset32 = if lfh_offset >= limits.field32 {
        extra.local_header_offset = Some(lfh_offset);
        U32_SENTINEL
    } else {
        lfh_offset as u32
    };
    let zip64 = !extra.is_empty();

    let (type_bits, default_mode, dos_dir_bit) = match kind {
        EntryKind::File => (0o100000u32, 0o644, 0u32),
        EntryKind::Directory => (0o040000, 0o755, 0x10),
        EntryKind::Symlink => (0o120000, 0o644, 0),
    };
    let mode = unix_permissions.unwrap_or(default_mode) & 0o7777;
    let external_attributes = (type_bits | mode) << 16 | dos_dir_bit;

    CentralDirectoryHeader {
        version_made_by: VERSION_MADE_BY,
        version_needed: if zip64 {
            VERSION_NEEDED_ZIP64
        } else {
            VERSION_NEEDED_DEFAULT
        },
        flags: FLAG_UTF8,
        compression_method: method.as_u16(),
        last_mod_time: dos_date_time.1,
        last_mod_date: dos_date_time.0,
        crc32,
        compressed_size: compressed32,
        uncompressed_size: uncompressed32,
        disk_number_start: 0,
        internal_attributes: 0,
        external_attributes,
        local_header_offset: offset32,
        file_name: stored_path.as_bytes().to_vec(),
        extra_field: if zip64 { extra.encode() } else { Vec::new() },
        comment: Vec::new(),
    }
}

/// Emit the archive tail at the current cursor: a ZIP64 record and
/// locator when any value overflows, then the classic EOCD.
pub(crate) async fn write_tail(
    source: &mut dyn ByteSource,
    limits: Limits,
    cd_offset: u64,
    cd_size: u64,
    entry_count: u64,
    comment: Vec<u8>,
) -> Result<()> {
    let needs_zip64 = entry_count >= limits.entries16
        || cd_size >= limits.field32
        || cd_offset >= limits.field32;

    if needs_zip64 {
        let record_offset = source.position();
        let record = Zip64EndOfCentralDirectory {
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_NEEDED_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entry_count,
            total_entries: entry_count,
            cd_size,
            cd_offset,
        };
        let locator = Zip64Locator {
            disk_with_eocd64: 0,
            eocd64_offset: record_offset,
            total_disks: 1,
        };
        source.write(&record.encode()).await?;
        source.write(&locator.encode()).await?;
    }

    let clamp16 = |v: u64| -> u16 {
        if v >= limits.entries16 {
            U16_SENTINEL
        } else {
            v as u16
        }
    };
    let clamp32 = |v: u64| -> u32 {
        if v >= limits.field32 {
            U32_SENTINEL
        } else {
            v as u32
        }
    };
    let eocd = EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: clamp16(entry_count),
        total_entries: clamp16(entry_count),
        cd_size: clamp32(cd_size),
        cd_offset: clamp32(cd_offset),
        comment,
    };
    source.write(&eocd.encode()).await?;
    Ok(())
}

/// Restore the archive to its pre-add bytes: the snapshot region goes
/// back where the new local header went.
async fn rollback<S: ByteSource>(
    inner: &mut ArchiveInner<S>,
    snapshot: &Snapshot,
    buffer_size: usize,
) -> Result<()> {
    inner.source.truncate(snapshot.cd_offset).await?;
    inner.source.seek(snapshot.cd_offset);
    io::write_chunked(&mut inner.source, &snapshot.trailing, buffer_size).await?;
    inner.source.flush().await?;
    log::debug!("rolled archive back to {} bytes", inner.source.len());
    Ok(())
}
