//! ZIP archive engine: format structures, iteration and mutation.
//!
//! ## Architecture
//!
//! The module is organized around the on-disk format and the operations
//! over it:
//!
//! - `structures`: wire records (headers, EOCD, ZIP64 tail, descriptors)
//!   with matching parse and encode halves
//! - `entry`: the in-memory entry model with ZIP64-effective values
//! - `archive`: opening, EOCD location, central directory iteration
//! - `extract`, `add`, `remove`: the streaming operations
//! - `codec`: chunked DEFLATE and CRC32 plumbing
//!
//! ## Update protocol
//!
//! Appending overwrites the central directory with the new entry's local
//! header and data (the directory bytes are snapshotted and re-emitted
//! behind the data), then writes a fresh EOCD. Removal rewrites surviving
//! entries into a sidecar archive that atomically replaces the original.
//! Both paths leave the archive untouched on failure.
//!
//! ## Supported format subset
//!
//! - PKZIP APPNOTE 6.3.x layout, stored and DEFLATE methods
//! - ZIP64 extensions for large archives, on read and on write
//! - Data descriptors on read (entries written here never need them)
//! - No encryption and no multi-volume archives

pub(crate) mod add;
pub(crate) mod archive;
pub(crate) mod codec;
pub(crate) mod entry;
pub(crate) mod extract;
pub(crate) mod remove;
pub(crate) mod structures;

pub use add::AddOptions;
pub use archive::{AccessMode, Archive};
pub use entry::{Entry, EntryKind, PathEncoding};
pub use extract::ExtractOptions;
pub use remove::RemoveOptions;
pub use structures::CompressionMethod;

/// Chunk size used by streaming reads and writes unless overridden.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
