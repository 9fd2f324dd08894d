//! Shared helpers for the integration tests.
#![allow(dead_code)]

use zipkit::{AddOptions, Archive, ByteSource, CompressionMethod, EntryKind};

/// Deterministic pseudo-random payload (xorshift64*), so large test
/// inputs need no extra dependency and failures reproduce exactly.
pub fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.max(1);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let word = state.wrapping_mul(0x2545F4914F6CDD1D);
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// Add `data` as a file entry, serving it from memory in chunks.
pub async fn add_bytes<S: ByteSource>(
    archive: &Archive<S>,
    path: &str,
    data: &[u8],
    method: CompressionMethod,
) -> zipkit::Result<()> {
    let opts = AddOptions {
        compression_method: method,
        ..AddOptions::default()
    };
    add_bytes_with(archive, path, data, opts).await
}

pub async fn add_bytes_with<S: ByteSource>(
    archive: &Archive<S>,
    path: &str,
    data: &[u8],
    opts: AddOptions,
) -> zipkit::Result<()> {
    let owned = data.to_vec();
    archive
        .add_entry(
            path,
            EntryKind::File,
            owned.len() as u64,
            opts,
            move |position, chunk_size| {
                let start = position as usize;
                Ok(owned[start..start + chunk_size].to_vec())
            },
        )
        .await
}

/// Add a symlink entry pointing at `target`.
pub async fn add_symlink<S: ByteSource>(
    archive: &Archive<S>,
    path: &str,
    target: &str,
) -> zipkit::Result<()> {
    let payload = target.as_bytes().to_vec();
    archive
        .add_entry(
            path,
            EntryKind::Symlink,
            payload.len() as u64,
            AddOptions::default(),
            move |position, chunk_size| {
                let start = position as usize;
                Ok(payload[start..start + chunk_size].to_vec())
            },
        )
        .await
}
