//! Round-trip behaviour: create, add, reopen, extract.

mod common;

use common::{add_bytes, random_bytes};
use tempfile::tempdir;
use zipkit::{
    AccessMode, AddOptions, Archive, CompressionMethod, EntryKind, ExtractOptions, ZipError,
};

#[tokio::test]
async fn create_add_empty_file_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.zip");

    let archive = Archive::open(&path, AccessMode::Create).await.unwrap();
    add_bytes(&archive, "empty.txt", b"", CompressionMethod::Stored)
        .await
        .unwrap();
    drop(archive);

    let archive = Archive::open(&path, AccessMode::Read).await.unwrap();
    let entry = archive.get("empty.txt").await.unwrap().expect("entry");
    assert_eq!(entry.uncompressed_size(), 0);
    assert_eq!(entry.crc32(), 0);

    let data = archive.extract_to_vec(&entry).await.unwrap();
    assert!(data.is_empty());
}

#[tokio::test]
async fn large_deflated_entry_round_trips() {
    let payload = random_bytes(7, 20 * 1024 * 1024);

    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "big.bin", &payload, CompressionMethod::Deflate)
        .await
        .unwrap();

    let entry = archive.get("big.bin").await.unwrap().expect("entry");
    assert_eq!(entry.uncompressed_size(), payload.len() as u64);
    assert!(entry.compressed_size() > 0);

    let mut out = Vec::new();
    let crc = archive
        .extract(&entry, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(out, payload);
    assert_eq!(crc, crc32fast::hash(&payload));
    assert_eq!(crc, entry.crc32());
}

#[tokio::test]
async fn stored_entry_round_trips() {
    let payload = random_bytes(21, 123_457);

    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "raw.bin", &payload, CompressionMethod::Stored)
        .await
        .unwrap();

    let entry = archive.get("raw.bin").await.unwrap().expect("entry");
    assert_eq!(entry.compressed_size(), entry.uncompressed_size());
    assert_eq!(entry.compression_method(), CompressionMethod::Stored);

    let out = archive.extract_to_vec(&entry).await.unwrap();
    assert_eq!(out, payload);
}

#[tokio::test]
async fn reopening_bytes_preserves_entries() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    let contents: Vec<(String, Vec<u8>)> = (0..12)
        .map(|i| (format!("file-{i}.bin"), random_bytes(i as u64 + 1, 3000 + i)))
        .collect();
    for (name, data) in &contents {
        add_bytes(&archive, name, data, CompressionMethod::Deflate)
            .await
            .unwrap();
    }
    let bytes = archive.bytes().await;

    let reopened = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entries = reopened.entries().await.unwrap();
    assert_eq!(entries.len(), contents.len());
    for (entry, (name, data)) in entries.iter().zip(&contents) {
        assert_eq!(entry.path(), name);
        assert_eq!(entry.uncompressed_size(), data.len() as u64);
        let out = reopened.extract_to_vec(entry).await.unwrap();
        assert_eq!(&out, data);
    }
}

#[tokio::test]
async fn crc_mismatch_is_detected_and_last_chunk_held_back() {
    let payload = random_bytes(3, 200_000);
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "payload.bin", &payload, CompressionMethod::Stored)
        .await
        .unwrap();
    let mut bytes = archive.bytes().await;

    // Flip one byte inside the stored entry data (past the local header).
    let victim = 40 + payload.len() / 2;
    bytes[victim] ^= 0xFF;

    let corrupted = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entry = corrupted.get("payload.bin").await.unwrap().expect("entry");

    let mut delivered = 0u64;
    let err = corrupted
        .extract(&entry, |chunk| {
            delivered += chunk.len() as u64;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::InvalidCrc32 { .. }));
    assert!(delivered < entry.uncompressed_size());

    // Skipping verification turns the same extraction into a success.
    let opts = ExtractOptions {
        skip_crc32: true,
        ..ExtractOptions::default()
    };
    let mut out = Vec::new();
    corrupted
        .extract_with(&entry, opts, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(out.len(), payload.len());
}

#[tokio::test]
async fn duplicate_paths_first_wins() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "dup.txt", b"first", CompressionMethod::Stored)
        .await
        .unwrap();
    add_bytes(&archive, "dup.txt", b"second", CompressionMethod::Stored)
        .await
        .unwrap();

    assert_eq!(archive.entries().await.unwrap().len(), 2);
    let entry = archive.get("dup.txt").await.unwrap().expect("entry");
    let out = archive.extract_to_vec(&entry).await.unwrap();
    assert_eq!(out, b"first");
}

#[tokio::test]
async fn directory_and_symlink_entries() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    archive
        .add_entry(
            "assets",
            EntryKind::Directory,
            0,
            AddOptions::default(),
            |_, _| Ok(Vec::new()),
        )
        .await
        .unwrap();
    common::add_symlink(&archive, "assets/link", "target.txt")
        .await
        .unwrap();

    let dir = archive.get("assets/").await.unwrap().expect("directory");
    assert_eq!(dir.kind(), EntryKind::Directory);
    assert_eq!(dir.compression_method(), CompressionMethod::Stored);

    let link = archive.get("assets/link").await.unwrap().expect("symlink");
    assert_eq!(link.kind(), EntryKind::Symlink);
    let out = archive.extract_to_vec(&link).await.unwrap();
    assert_eq!(out, b"target.txt");
}

#[tokio::test]
async fn iteration_count_matches_directory_total() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    for i in 0..37 {
        add_bytes(
            &archive,
            &format!("n{i}"),
            &[i as u8],
            CompressionMethod::Stored,
        )
        .await
        .unwrap();
    }
    assert_eq!(archive.entries().await.unwrap().len(), 37);
}

#[tokio::test]
async fn zero_buffer_size_is_rejected() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "x", b"data", CompressionMethod::Stored)
        .await
        .unwrap();
    let entry = archive.get("x").await.unwrap().unwrap();

    let opts = ExtractOptions {
        buffer_size: 0,
        ..ExtractOptions::default()
    };
    let err = archive
        .extract_with(&entry, opts, |_| Ok(()))
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::InvalidBufferSize));

    let add_opts = AddOptions {
        buffer_size: 0,
        ..AddOptions::default()
    };
    let err = common::add_bytes_with(&archive, "y", b"more", add_opts)
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::InvalidBufferSize));
}

#[tokio::test]
async fn read_mode_rejects_mutation() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "a", b"a", CompressionMethod::Stored)
        .await
        .unwrap();
    let bytes = archive.bytes().await;

    let readonly = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let err = add_bytes(&readonly, "b", b"b", CompressionMethod::Stored)
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::UnwritableArchive));
}

#[tokio::test]
async fn create_mode_refuses_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("exists.zip");
    std::fs::write(&path, b"not empty").unwrap();

    let err = Archive::open(&path, AccessMode::Create).await.unwrap_err();
    match err {
        ZipError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists),
        other => panic!("expected I/O error, got {other:?}"),
    }
}

#[tokio::test]
async fn archive_comment_is_preserved_across_add() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "a.txt", b"aaa", CompressionMethod::Stored)
        .await
        .unwrap();
    let mut bytes = archive.bytes().await;

    // Graft a comment onto the EOCD by patching its length field.
    let comment = b"release build";
    let comment_len_at = bytes.len() - 2;
    bytes[comment_len_at..].copy_from_slice(&(comment.len() as u16).to_le_bytes());
    bytes.extend_from_slice(comment);

    let archive = Archive::open_in_memory(Some(bytes), AccessMode::Update)
        .await
        .unwrap();
    assert_eq!(archive.comment().await, comment);

    add_bytes(&archive, "b.txt", b"bbb", CompressionMethod::Stored)
        .await
        .unwrap();
    assert_eq!(archive.comment().await, comment);

    let reopened = Archive::open_in_memory(Some(archive.bytes().await), AccessMode::Read)
        .await
        .unwrap();
    assert_eq!(reopened.entries().await.unwrap().len(), 2);
    assert_eq!(reopened.comment().await, comment);
}

#[tokio::test]
async fn encrypted_entries_are_omitted_from_iteration() {
    let archive = Archive::open_in_memory(None, AccessMode::Create)
        .await
        .unwrap();
    add_bytes(&archive, "plain.txt", b"visible", CompressionMethod::Stored)
        .await
        .unwrap();
    add_bytes(&archive, "secret.txt", b"hidden!", CompressionMethod::Stored)
        .await
        .unwrap();
    let mut bytes = archive.bytes().await;

    // Set the encryption bit on the second entry's directory record.
    let needle = b"secret.txt";
    let cds_name_pos = bytes
        .windows(needle.len())
        .rposition(|w| w == needle)
        .unwrap();
    let flags_pos = cds_name_pos - 46 + 8;
    bytes[flags_pos] |= 1;

    let archive = Archive::open_in_memory(Some(bytes), AccessMode::Read)
        .await
        .unwrap();
    let entries = archive.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path(), "plain.txt");
}
