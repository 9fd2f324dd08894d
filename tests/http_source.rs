//! HTTP range source behaviour against a local mock server.
//!
//! The server speaks just enough HTTP/1.1 for the source: HEAD with
//! `Content-Length` and `Accept-Ranges`, and GET with a `Range` header
//! answered by 206 Partial Content. Every connection serves one request
//! and closes, so nothing lingers in the client's connection pool and
//! the retry test can take the listener down deterministically.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use zipkit::{AccessMode, Archive, ByteSource, CompressionMethod, HttpSource, ZipError};

use common::{add_bytes, random_bytes};

fn spawn_server(listener: TcpListener, payload: Arc<Vec<u8>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let payload = payload.clone();
            tokio::spawn(async move {
                let _ = serve_request(stream, &payload).await;
            });
        }
    })
}

/// Answer a single request, then close the connection.
async fn serve_request(mut stream: TcpStream, payload: &[u8]) -> Result<()> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&chunk[..n]);
    }
    let request = String::from_utf8_lossy(&request).into_owned();

    let response = build_response(&request, payload)?;
    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}

fn build_response(request: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let is_head = request.starts_with("HEAD");
    // Header names arrive lowercase from hyper; match them case-blind.
    let range = request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("range") {
            value.trim().strip_prefix("bytes=")
        } else {
            None
        }
    });

    let mut response = Vec::new();
    match range {
        Some(range) if !is_head => {
            let (start, end) = range.split_once('-').context("malformed Range header")?;
            let start: usize = start.parse().context("bad range start")?;
            let end: usize = end.parse().context("bad range end")?;
            let end = end.min(payload.len().saturating_sub(1));
            let body = &payload[start..=end];
            response.extend_from_slice(
                format!(
                    "HTTP/1.1 206 Partial Content\r\n\
                     Content-Length: {}\r\n\
                     Content-Range: bytes {start}-{end}/{}\r\n\
                     Accept-Ranges: bytes\r\n\
                     Connection: close\r\n\r\n",
                    body.len(),
                    payload.len(),
                )
                .as_bytes(),
            );
            response.extend_from_slice(body);
        }
        _ => {
            response.extend_from_slice(
                format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Length: {}\r\n\
                     Accept-Ranges: bytes\r\n\
                     Connection: close\r\n\r\n",
                    payload.len(),
                )
                .as_bytes(),
            );
            if !is_head {
                response.extend_from_slice(payload);
            }
        }
    }
    Ok(response)
}

#[tokio::test]
async fn http_source_serves_ranged_reads() -> Result<()> {
    let payload = Arc::new(random_bytes(90, 100_000));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let _server = spawn_server(listener, payload.clone());

    let url = format!("http://{addr}/data.bin");
    let mut source = HttpSource::connect(&url).await?;
    assert_eq!(source.len(), payload.len() as u64);
    assert!(!source.is_writable());

    source.seek(50_000);
    let mut buf = vec![0u8; 1000];
    let n = source.read(&mut buf).await?;
    assert_eq!(n, 1000);
    assert_eq!(buf, &payload[50_000..51_000]);
    assert_eq!(source.position(), 51_000);

    // A read crossing the end is clamped to the remote length.
    source.seek(payload.len() as u64 - 10);
    let n = source.read(&mut buf).await?;
    assert_eq!(n, 10);
    assert_eq!(&buf[..10], &payload[payload.len() - 10..]);

    // Past the end there is nothing to request.
    source.seek(payload.len() as u64 + 5);
    assert_eq!(source.read(&mut buf).await?, 0);

    assert_eq!(source.transferred_bytes(), 1010);
    Ok(())
}

#[tokio::test]
async fn http_source_rejects_writes() -> Result<()> {
    let payload = Arc::new(random_bytes(93, 4096));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let _server = spawn_server(listener, payload);

    let mut source = HttpSource::connect(&format!("http://{addr}/x")).await?;
    let err = source.write(b"nope").await.unwrap_err();
    assert!(matches!(err, ZipError::UnwritableArchive));
    Ok(())
}

#[tokio::test]
async fn http_archive_lists_and_extracts() -> Result<()> {
    // Build a real archive in memory, then serve its bytes.
    let local = Archive::open_in_memory(None, AccessMode::Create).await?;
    let payload = random_bytes(91, 200_000);
    add_bytes(&local, "remote.bin", &payload, CompressionMethod::Deflate).await?;
    add_bytes(
        &local,
        "hello.txt",
        b"hello over http",
        CompressionMethod::Stored,
    )
    .await?;
    let bytes = Arc::new(local.bytes().await);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let _server = spawn_server(listener, bytes);

    let remote = Archive::open_url(&format!("http://{addr}/archive.zip")).await?;
    let entries = remote.entries().await?;
    assert_eq!(entries.len(), 2);

    let entry = remote.get("remote.bin").await?.context("missing entry")?;
    let out = remote.extract_to_vec(&entry).await?;
    assert_eq!(out, payload);

    let hello = remote.get("hello.txt").await?.context("missing entry")?;
    assert_eq!(remote.extract_to_vec(&hello).await?, b"hello over http");
    Ok(())
}

#[tokio::test]
async fn http_archive_rejects_mutation() -> Result<()> {
    let local = Archive::open_in_memory(None, AccessMode::Create).await?;
    add_bytes(&local, "a.txt", b"aaa", CompressionMethod::Stored).await?;
    let bytes = Arc::new(local.bytes().await);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let _server = spawn_server(listener, bytes);

    let remote = Archive::open_url(&format!("http://{addr}/archive.zip")).await?;
    let err = add_bytes(&remote, "b.txt", b"bbb", CompressionMethod::Stored)
        .await
        .unwrap_err();
    assert!(matches!(err, ZipError::UnwritableArchive));
    Ok(())
}

#[tokio::test]
async fn http_source_retries_after_transient_connect_failure() -> Result<()> {
    let payload = Arc::new(random_bytes(92, 50_000));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = spawn_server(listener, payload.clone());

    let url = format!("http://{addr}/data.bin");
    let mut source = HttpSource::connect(&url).await?;

    // Take the server down so the next GET is refused, then bring it
    // back while the source sits out its first backoff.
    server.abort();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rebind_payload = payload.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let listener = TcpListener::bind(addr).await.expect("rebind");
        let _server = spawn_server(listener, rebind_payload);
    });

    source.seek(1000);
    let mut buf = vec![0u8; 500];
    let n = source.read(&mut buf).await?;
    assert_eq!(n, 500);
    assert_eq!(buf, &payload[1000..1500]);
    Ok(())
}
