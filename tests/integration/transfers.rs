//! Attachment transfers end to end: chunking on the sender, reassembly on
//! the server, download back out.

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

use satchel_core::wire::{self, AttachmentFrame, Frame};

use crate::{create_account, download_until, exchange, fire, fire_raw, spawn_server};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[tokio::test]
async fn chunked_file_reassembles_out_of_order() -> Result<()> {
    let server = spawn_server("reorder").await?;
    create_account(&server, "bob").await?;

    let data = patterned(2500);
    let frames = wire::attachment_frames(
        "alice",
        "bob",
        "see attachment",
        "report.bin",
        &data,
        wire::MAX_DATAGRAM,
    )?;
    assert!(frames.len() >= 3, "want a multi-chunk transfer");

    // Worst-case arrival order: last chunk first.
    for frame in frames.iter().rev() {
        fire_raw(&server, frame).await?;
    }

    download_until(&server, "bob", "report.bin", &data).await?;

    // Exactly one email record for the whole transfer.
    let record =
        std::fs::read_to_string(server.root.join("bob").join("email_from_alice.txt"))?;
    assert_eq!(record.lines().count(), 1, "record: {record:?}");
    assert!(record.contains("see attachment"));
    Ok(())
}

#[tokio::test]
async fn duplicated_chunks_do_not_corrupt_the_file() -> Result<()> {
    let server = spawn_server("duplicates").await?;
    create_account(&server, "bob").await?;

    let data = patterned(1800);
    let frames = wire::attachment_frames(
        "alice",
        "bob",
        "again",
        "dup.bin",
        &data,
        wire::MAX_DATAGRAM,
    )?;

    // Every chunk twice, as a lossy network's blind retransmit would.
    for frame in frames.iter().chain(frames.iter()) {
        fire_raw(&server, frame).await?;
    }

    download_until(&server, "bob", "dup.bin", &data).await
}

#[tokio::test]
async fn single_chunk_and_empty_files_transfer() -> Result<()> {
    let server = spawn_server("small").await?;
    create_account(&server, "bob").await?;

    let small = b"just a few bytes".to_vec();
    for frame in
        wire::attachment_frames("alice", "bob", "small", "small.bin", &small, wire::MAX_DATAGRAM)?
    {
        fire_raw(&server, &frame).await?;
    }
    download_until(&server, "bob", "small.bin", &small).await?;

    for frame in
        wire::attachment_frames("alice", "bob", "empty", "empty.bin", &[], wire::MAX_DATAGRAM)?
    {
        fire_raw(&server, &frame).await?;
    }
    download_until(&server, "bob", "empty.bin", &[]).await
}

#[tokio::test]
async fn malformed_chunk_metadata_is_ignored() -> Result<()> {
    let server = spawn_server("badmeta").await?;
    create_account(&server, "bob").await?;

    // Non-numeric chunk index: dropped at decode, no state, no file.
    fire_raw(&server, b"SEND_EMAIL_WITH_ATTACHMENT:alice:bob:evil.bin:x:2:2:hiXY").await?;
    // Declared payload longer than the datagram: dropped at decode.
    fire_raw(&server, b"SEND_EMAIL_WITH_ATTACHMENT:alice:bob:evil.bin:0:1:999:hi").await?;
    // Chunk count at the u32 maximum: rejected at ingest, nothing allocated.
    fire_raw(
        &server,
        b"SEND_EMAIL_WITH_ATTACHMENT:alice:bob:evil.bin:0:4294967295:2:hiXY",
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let reply = exchange(
        &server,
        &Frame::Download {
            account: "bob".into(),
            file_name: "evil.bin".into(),
        },
    )
    .await?;
    assert_eq!(reply, b"File not found!");
    Ok(())
}

#[tokio::test]
async fn attachment_to_unknown_account_is_dropped() -> Result<()> {
    let server = spawn_server("noaccount").await?;

    let frame = Frame::Attachment(AttachmentFrame {
        from: "alice".into(),
        to: "ghost".into(),
        file_name: "f.bin".into(),
        chunk_index: 0,
        chunk_count: 1,
        body: "boo".into(),
        payload: Bytes::from_static(b"data"),
    });
    fire(&server, &frame).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.root.join("ghost").exists());
    Ok(())
}

#[tokio::test]
async fn second_transfer_after_completion_overwrites() -> Result<()> {
    let server = spawn_server("rewrite").await?;
    create_account(&server, "bob").await?;

    let first = patterned(1200);
    for frame in
        wire::attachment_frames("alice", "bob", "v1", "doc.bin", &first, wire::MAX_DATAGRAM)?
    {
        fire_raw(&server, &frame).await?;
    }
    download_until(&server, "bob", "doc.bin", &first).await?;

    // A completed key is free again; a fresh transfer replaces the file.
    let second = patterned(900);
    for frame in
        wire::attachment_frames("alice", "bob", "v2", "doc.bin", &second, wire::MAX_DATAGRAM)?
    {
        fire_raw(&server, &frame).await?;
    }
    download_until(&server, "bob", "doc.bin", &second).await
}
