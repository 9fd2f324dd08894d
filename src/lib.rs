//! # zipkit
//!
//! A random-access ZIP archive engine. Archives can be read, created and
//! updated in place over local files, in-memory buffers, or remote HTTP
//! sources using Range requests, including large archives using the ZIP64
//! extensions.
//!
//! ## Features
//!
//! - Read, create and update archives through one [`Archive`] type
//! - Streaming extraction with CRC32 verification, including ranged
//!   extraction over stored and deflated entries
//! - Transactional appends: a cancelled or failed add rolls the archive
//!   back byte for byte
//! - Entry removal via an atomically renamed sidecar rewrite
//! - ZIP64 support on read and write, with automatic field promotion
//! - Path containment checks for extracted entries and symlinks
//!
//! ## Example
//!
//! ```no_run
//! use zipkit::{AccessMode, Archive};
//!
//! #[tokio::main]
//! async fn main() -> zipkit::Result<()> {
//!     // List a remote archive without downloading it.
//!     let archive = Archive::open_url("https://example.com/archive.zip").await?;
//!     for entry in archive.entries().await? {
//!         println!("{} ({} bytes)", entry.path(), entry.uncompressed_size());
//!     }
//!
//!     // Pull one entry into memory.
//!     if let Some(entry) = archive.get("README.md").await? {
//!         let data = archive.extract_to_vec(&entry).await?;
//!         println!("{}", String::from_utf8_lossy(&data));
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod io;
pub mod progress;
pub mod zip;

pub use error::{Result, ZipError};
pub use io::{ByteSource, FileSource, HttpSource, MemorySource};
pub use progress::Progress;
pub use zip::{
    AccessMode, AddOptions, Archive, CompressionMethod, DEFAULT_BUFFER_SIZE, Entry, EntryKind,
    ExtractOptions, PathEncoding, RemoveOptions,
};
