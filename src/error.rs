//! Error types and the related `Result<T>`.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZipError>;

/// Everything that can go wrong while reading or rewriting an archive.
#[derive(Debug, Error)]
pub enum ZipError {
    /// No End of Central Directory record within the last 65557 bytes.
    #[error("missing end of central directory record")]
    MissingEndOfCentralDirectoryRecord,

    /// A central directory record points at something that is not a
    /// local file header.
    #[error("no local file header at offset {0}")]
    LocalHeaderNotFound(u64),

    /// The entry uses a compression method other than stored or deflate.
    #[error("invalid compression method: {0}")]
    InvalidCompressionMethod(u16),

    /// The entry path is empty, contains NUL, or escapes the destination.
    #[error("invalid entry path: {0:?}")]
    InvalidEntryPath(String),

    /// An entry size field is inconsistent with the archive bounds.
    #[error("invalid entry size")]
    InvalidEntrySize,

    /// The central directory size does not fit inside the archive.
    #[error("invalid central directory size")]
    InvalidCentralDirectorySize,

    /// The central directory offset points outside the archive.
    #[error("invalid central directory offset")]
    InvalidCentralDirectoryOffset,

    /// The entry count disagrees between EOCD variants or exceeds bounds.
    #[error("invalid central directory entry count")]
    InvalidCentralDirectoryEntryCount,

    /// A local file header failed to decode.
    #[error("invalid local file header")]
    InvalidLocalHeaderSize,

    /// The computed start of entry data lies outside the archive.
    #[error("invalid local header data offset")]
    InvalidLocalHeaderDataOffset,

    /// The running CRC32 did not match the one stored for the entry.
    #[error("CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    InvalidCrc32 { stored: u32, computed: u32 },

    /// The DEFLATE stream could not be decoded.
    #[error("corrupted compressed data: {0}")]
    CorruptedData(String),

    /// The archive could not be opened for reading.
    #[error("unreadable archive")]
    UnreadableArchive,

    /// A mutating operation was attempted on a read-only source or mode.
    #[error("unwritable archive")]
    UnwritableArchive,

    /// A chunk size of zero was requested.
    #[error("invalid buffer size")]
    InvalidBufferSize,

    /// A requested byte range does not lie within the entry.
    #[error("range out of bounds")]
    RangeOutOfBounds,

    /// The operation only applies to file entries.
    #[error("entry is not a file")]
    EntryIsNotAFile,

    /// A symlink target would resolve outside the destination directory.
    #[error("symlink target escapes the destination: {0}")]
    UncontainedSymlink(PathBuf),

    /// The caller cancelled the operation through its `Progress` token.
    #[error("operation cancelled")]
    CancelledOperation,

    /// An error from underlying I/O.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// An error from the HTTP byte source.
    #[error("HTTP error")]
    Http(#[from] reqwest::Error),

    /// Internal short-circuit for ranged extraction. Never surfaced.
    #[doc(hidden)]
    #[error("end of requested range")]
    EndOfRange,
}
