//! Entry extraction: streaming, to the filesystem, and by byte range.
//!
//! All variants stream in fixed-size chunks through a caller-supplied
//! consumer, accumulate a CRC32 over the decoded bytes, and poll the
//! optional [`Progress`] token at chunk boundaries. When verification is
//! on, delivery lags one chunk behind decoding so a CRC mismatch is
//! reported without the final chunk ever reaching the consumer.

use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use super::archive::{Archive, ArchiveInner};
use super::codec::Inflater;
use super::entry::{Entry, EntryKind};
use super::structures::CompressionMethod;
use super::DEFAULT_BUFFER_SIZE;
use crate::error::{Result, ZipError};
use crate::io::{self, ByteSource};
use crate::progress::Progress;

/// Knobs for [`Archive::extract_with`] and [`Archive::extract_to_path`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub buffer_size: usize,
    /// Skip CRC32 accumulation and verification.
    pub skip_crc32: bool,
    /// Materialize symlinks whose target resolves outside the
    /// destination directory instead of failing.
    pub allow_uncontained_symlinks: bool,
    pub progress: Option<Progress>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            skip_crc32: false,
            allow_uncontained_symlinks: false,
            progress: None,
        }
    }
}

impl<S: ByteSource> Archive<S> {
    /// Stream an entry through `consumer` with default options, returning
    /// the CRC32 of the delivered bytes.
    pub async fn extract<F>(&self, entry: &Entry, consumer: F) -> Result<u32>
    where
        F: FnMut(&[u8]) -> Result<()> + Send,
    {
        self.extract_with(entry, ExtractOptions::default(), consumer)
            .await
    }

    /// Stream an entry through `consumer`.
    ///
    /// Files are decoded according to their compression method, a
    /// directory yields a single empty chunk, and a symlink yields its
    /// target path bytes in one chunk.
    pub async fn extract_with<F>(
        &self,
        entry: &Entry,
        opts: ExtractOptions,
        mut consumer: F,
    ) -> Result<u32>
    where
        F: FnMut(&[u8]) -> Result<()> + Send,
    {
        let mut inner = self.inner.lock().await;
        stream_entry(&mut inner, entry, &opts, &mut consumer).await
    }

    /// Extract an entry into memory.
    pub async fn extract_to_vec(&self, entry: &Entry) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.extract(entry, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await?;
        Ok(out)
    }

    /// Extract an entry to `target` on the filesystem.
    ///
    /// Refuses to overwrite an existing target, validates the entry path
    /// before touching the filesystem, creates parent directories, and
    /// transfers the entry's POSIX permissions and modification time. A
    /// failed extraction leaves any partial output in place for the
    /// caller to clean up; the file handle is closed either way.
    pub async fn extract_to_path(
        &self,
        entry: &Entry,
        target: impl AsRef<Path>,
        opts: ExtractOptions,
    ) -> Result<u32> {
        let target = target.as_ref();
        validate_entry_path(entry.path())?;
        if std::fs::symlink_metadata(target).is_ok() {
            return Err(ZipError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("refusing to overwrite {}", target.display()),
            )));
        }
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut inner = self.inner.lock().await;
        match entry.kind() {
            EntryKind::Directory => {
                tokio::fs::create_dir_all(target).await?;
                set_unix_permissions(target, entry.unix_mode().unwrap_or(0o755))?;
                Ok(0)
            }
            EntryKind::File => {
                let mut file = std::fs::File::create_new(target)?;
                let crc = {
                    use std::io::Write;
                    stream_entry(&mut inner, entry, &opts, &mut |chunk| {
                        file.write_all(chunk).map_err(ZipError::from)
                    })
                    .await?
                };
                file.sync_all()?;
                set_unix_permissions(target, entry.unix_mode().unwrap_or(0o644))?;
                if let Some(modified) = entry.modified() {
                    let system_time = std::time::SystemTime::UNIX_EPOCH
                        + std::time::Duration::from_secs(modified.and_utc().timestamp() as u64);
                    file.set_modified(system_time)?;
                }
                Ok(crc)
            }
            EntryKind::Symlink => {
                let mut link_target = Vec::new();
                let crc = stream_entry(&mut inner, entry, &opts, &mut |chunk| {
                    link_target.extend_from_slice(chunk);
                    Ok(())
                })
                .await?;
                let link_target = PathBuf::from(String::from_utf8_lossy(&link_target).into_owned());

                let parent = target.parent().unwrap_or(Path::new("."));
                if !opts.allow_uncontained_symlinks
                    && !symlink_is_contained(parent, &link_target)?
                {
                    return Err(ZipError::UncontainedSymlink(link_target));
                }
                make_symlink(&link_target, target)?;
                Ok(crc)
            }
        }
    }

    /// Stream the bytes `range` of a file entry through `consumer`.
    ///
    /// Over a stored entry this seeks straight to the range; over a
    /// deflated entry the whole stream is decoded and sliced, stopping as
    /// soon as the upper bound is reached.
    pub async fn extract_range<F>(
        &self,
        entry: &Entry,
        range: Range<u64>,
        buffer_size: usize,
        mut consumer: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()> + Send,
    {
        if entry.kind() != EntryKind::File {
            return Err(ZipError::EntryIsNotAFile);
        }
        if buffer_size == 0 {
            return Err(ZipError::InvalidBufferSize);
        }
        if range.start > range.end || range.end > entry.uncompressed_size() {
            return Err(ZipError::RangeOutOfBounds);
        }
        if range.start == range.end {
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        match entry.compression_method() {
            CompressionMethod::Stored => {
                let data_offset = inner.entry_data_offset(entry).await?;
                inner.source.seek(data_offset + range.start);
                let mut remaining = range.end - range.start;
                while remaining > 0 {
                    let chunk_len = remaining.min(buffer_size as u64) as usize;
                    let chunk = io::read_exact(&mut inner.source, chunk_len).await?;
                    consumer(&chunk)?;
                    remaining -= chunk_len as u64;
                }
                Ok(())
            }
            CompressionMethod::Deflate => {
                let mut decoded_offset = 0u64;
                let opts = ExtractOptions {
                    buffer_size,
                    skip_crc32: true,
                    ..ExtractOptions::default()
                };
                let result = stream_entry(&mut inner, entry, &opts, &mut |chunk| {
                    let chunk_start = decoded_offset;
                    let chunk_end = decoded_offset + chunk.len() as u64;
                    decoded_offset = chunk_end;

                    let lo = range.start.max(chunk_start);
                    let hi = range.end.min(chunk_end);
                    if lo < hi {
                        let slice =
                            &chunk[(lo - chunk_start) as usize..(hi - chunk_start) as usize];
                        consumer(slice)?;
                    }
                    if chunk_end >= range.end {
                        return Err(ZipError::EndOfRange);
                    }
                    Ok(())
                })
                .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(ZipError::EndOfRange) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            CompressionMethod::Unknown(method) => Err(ZipError::InvalidCompressionMethod(method)),
        }
    }
}

/// Shared streaming core behind every extract variant.
pub(crate) async fn stream_entry<S: ByteSource>(
    inner: &mut ArchiveInner<S>,
    entry: &Entry,
    opts: &ExtractOptions,
    consumer: &mut (dyn FnMut(&[u8]) -> Result<()> + Send),
) -> Result<u32> {
    if opts.buffer_size == 0 {
        return Err(ZipError::InvalidBufferSize);
    }
    if let Some(progress) = &opts.progress {
        progress.set_total(entry.uncompressed_size());
    }

    match entry.kind() {
        EntryKind::Directory => {
            consumer(&[])?;
            return Ok(0);
        }
        EntryKind::Symlink => {
            let data_offset = inner.entry_data_offset(entry).await?;
            inner.source.seek(data_offset);
            // The link target path is small; read it in one shot.
            let payload =
                io::read_exact(&mut inner.source, entry.compressed_size() as usize).await?;
            let crc = crc32fast::hash(&payload);
            if !opts.skip_crc32 && crc != entry.crc32() {
                return Err(ZipError::InvalidCrc32 {
                    stored: entry.crc32(),
                    computed: crc,
                });
            }
            consumer(&payload)?;
            if let Some(progress) = &opts.progress {
                progress.add_completed(payload.len() as u64);
            }
            return Ok(crc);
        }
        EntryKind::File => {}
    }

    let stored_crc = {
        let local = inner.load_local_header(entry).await?;
        local
            .descriptor
            .as_ref()
            .map(|d| d.crc32)
            .unwrap_or(entry.crc32())
    };
    let data_offset = inner.entry_data_offset(entry).await?;

    let mut hasher = crc32fast::Hasher::new();
    // Holding back one chunk keeps a CRC mismatch from delivering the
    // final (corrupt) piece of the stream.
    let mut held: Option<Vec<u8>> = None;
    let verify = !opts.skip_crc32;

    let mut deliver = |chunk: &[u8],
                       hasher: &mut crc32fast::Hasher,
                       held: &mut Option<Vec<u8>>|
     -> Result<()> {
        if verify {
            hasher.update(chunk);
            if let Some(previous) = held.replace(chunk.to_vec()) {
                consumer(&previous)?;
            }
            Ok(())
        } else {
            consumer(chunk)
        }
    };

    match entry.compression_method() {
        CompressionMethod::Stored => {
            inner.source.seek(data_offset);
            let mut remaining = entry.compressed_size();
            while remaining > 0 {
                check_cancelled(opts)?;
                let chunk_len = remaining.min(opts.buffer_size as u64) as usize;
                let chunk = io::read_exact(&mut inner.source, chunk_len).await?;
                deliver(&chunk, &mut hasher, &mut held)?;
                if let Some(progress) = &opts.progress {
                    progress.add_completed(chunk_len as u64);
                }
                remaining -= chunk_len as u64;
            }
        }
        CompressionMethod::Deflate => {
            inner.source.seek(data_offset);
            let mut inflater = Inflater::new();
            let budget = entry.uncompressed_size();
            let mut produced = 0u64;
            let mut remaining = entry.compressed_size();
            while remaining > 0 {
                check_cancelled(opts)?;
                let chunk_len = remaining.min(opts.buffer_size as u64) as usize;
                let compressed = io::read_exact(&mut inner.source, chunk_len).await?;
                remaining -= chunk_len as u64;

                inflater.push(&compressed, &mut |decoded| {
                    produced += decoded.len() as u64;
                    if produced > budget {
                        return Err(ZipError::InvalidEntrySize);
                    }
                    if let Some(progress) = &opts.progress {
                        progress.add_completed(decoded.len() as u64);
                    }
                    deliver(decoded, &mut hasher, &mut held)
                })?;
            }
            if !inflater.is_finished() || inflater.bytes_out() != budget {
                return Err(ZipError::InvalidEntrySize);
            }
        }
        CompressionMethod::Unknown(method) => {
            return Err(ZipError::InvalidCompressionMethod(method));
        }
    }

    let crc = hasher.finalize();
    if verify {
        if crc != stored_crc {
            return Err(ZipError::InvalidCrc32 {
                stored: stored_crc,
                computed: crc,
            });
        }
        if let Some(last) = held.take() {
            consumer(&last)?;
        }
    }
    Ok(crc)
}

fn check_cancelled(opts: &ExtractOptions) -> Result<()> {
    if opts.progress.as_ref().is_some_and(Progress::is_cancelled) {
        return Err(ZipError::CancelledOperation);
    }
    Ok(())
}

/// Reject entry paths that could write outside the destination before
/// any filesystem operation happens.
///
/// NUL bytes, absolute paths and `..` traversal that escapes the
/// extraction root are all refused. Backslashes are treated as
/// separators too, so `..\\` tricks resolve the same way.
pub(crate) fn validate_entry_path(path: &str) -> Result<()> {
    if path.is_empty() || path.contains('\0') {
        return Err(ZipError::InvalidEntryPath(path.to_owned()));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(ZipError::InvalidEntryPath(path.to_owned()));
    }

    let mut depth = 0i64;
    for component in path.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(ZipError::InvalidEntryPath(path.to_owned()));
                }
            }
            _ => depth += 1,
        }
    }
    Ok(())
}

/// Whether a symlink at `parent/<name>` pointing at `link_target` stays
/// inside `parent`.
pub(crate) fn symlink_is_contained(parent: &Path, link_target: &Path) -> Result<bool> {
    let parent = normalize_lexically(&std::path::absolute(parent)?);
    let resolved = if link_target.is_absolute() {
        normalize_lexically(link_target)
    } else {
        normalize_lexically(&parent.join(link_target))
    };
    Ok(resolved.starts_with(&parent))
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_unix_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(link_target: &Path, at: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link_target, at)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_symlink(link_target: &Path, at: &Path) -> Result<()> {
    // Without symlink support, materialize the target path as file text.
    std::fs::write(at, link_target.to_string_lossy().as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_paths_are_rejected() {
        assert!(validate_entry_path("ok/nested/file.txt").is_ok());
        assert!(validate_entry_path("a/../b.txt").is_ok());
        assert!(validate_entry_path("../evil").is_err());
        assert!(validate_entry_path("a/../../evil").is_err());
        assert!(validate_entry_path("/etc/passwd").is_err());
        assert!(validate_entry_path("..\\evil").is_err());
        assert!(validate_entry_path("nul\0byte").is_err());
        assert!(validate_entry_path("").is_err());
    }

    #[test]
    fn symlink_containment() {
        let parent = Path::new("/tmp/dest/sub");
        assert!(symlink_is_contained(parent, Path::new("sibling.txt")).unwrap());
        assert!(symlink_is_contained(parent, Path::new("deeper/file")).unwrap());
        assert!(!symlink_is_contained(parent, Path::new("../outside")).unwrap());
        assert!(!symlink_is_contained(parent, Path::new("/etc/passwd")).unwrap());
        assert!(
            !symlink_is_contained(parent, Path::new("ok/../../../outside")).unwrap()
        );
    }
}
