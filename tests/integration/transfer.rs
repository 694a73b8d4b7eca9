//! End-to-end transfers through paired registry sessions.

use crate::*;
use zferry_core::codec::encode_frame;
use zferry_transfer::{TransferEvent, TransferOutcome};

#[tokio::test]
async fn test_roundtrip_preserves_content_across_many_chunks() {
    let dir = scratch_dir("roundtrip");
    let source = dir.join("blob.bin");
    let body = patterned_bytes(64 * 1024);
    tokio::fs::write(&source, &body).await.unwrap();
    let inbox = dir.join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    let up = registry.create(Direction::Upload, &source).await.unwrap();
    let down = registry.create(Direction::Download, &inbox).await.unwrap();
    pump(&registry, up, down).await.unwrap();

    assert_eq!(registry.state(up), Some(SessionState::Completed));
    assert_eq!(registry.state(down), Some(SessionState::Completed));

    let landed = tokio::fs::read(inbox.join("blob.bin")).await.unwrap();
    assert_eq!(landed.len(), body.len());
    assert_eq!(landed, body, "byte-for-byte identical after the wire");

    let snap = registry.snapshot(down).unwrap();
    assert_eq!(snap.transferred, body.len() as u64);
    assert_eq!(snap.total, body.len() as u64);
    assert_eq!(snap.percent, 100);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_empty_file_roundtrip() {
    let dir = scratch_dir("empty");
    let source = dir.join("nothing.dat");
    tokio::fs::write(&source, b"").await.unwrap();
    let inbox = dir.join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    let up = registry.create(Direction::Upload, &source).await.unwrap();
    let down = registry.create(Direction::Download, &inbox).await.unwrap();
    pump(&registry, up, down).await.unwrap();

    assert_eq!(registry.state(up), Some(SessionState::Completed));
    assert_eq!(registry.state(down), Some(SessionState::Completed));
    let landed = tokio::fs::read(inbox.join("nothing.dat")).await.unwrap();
    assert!(landed.is_empty());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_repeat_upload_lands_under_a_suffixed_name() {
    let dir = scratch_dir("suffix");
    let source = dir.join("notes.txt");
    tokio::fs::write(&source, b"first copy").await.unwrap();
    let inbox = dir.join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    for _ in 0..2 {
        let up = registry.create(Direction::Upload, &source).await.unwrap();
        let down = registry.create(Direction::Download, &inbox).await.unwrap();
        pump(&registry, up, down).await.unwrap();
        registry.remove(up).await;
        registry.remove(down).await;
    }

    let first = tokio::fs::read(inbox.join("notes.txt")).await.unwrap();
    let second = tokio::fs::read(inbox.join("notes_1.txt")).await.unwrap();
    assert_eq!(first, b"first copy");
    assert_eq!(second, b"first copy");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_lifecycle_events_carry_final_byte_counts() {
    let dir = scratch_dir("events");
    let source = dir.join("counted.bin");
    let body = patterned_bytes(5000);
    tokio::fs::write(&source, &body).await.unwrap();
    let inbox = dir.join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let (registry, mut events) = TransferRegistry::new(EngineConfig::default());
    let up = registry.create(Direction::Upload, &source).await.unwrap();
    let down = registry.create(Direction::Download, &inbox).await.unwrap();
    pump(&registry, up, down).await.unwrap();
    registry.remove(up).await;
    registry.remove(down).await;

    let mut started = 0;
    let mut finished = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            TransferEvent::Started { .. } => started += 1,
            TransferEvent::Finished { outcome, .. } => {
                assert_eq!(outcome, TransferOutcome::Completed { bytes: 5000 });
                finished += 1;
            }
        }
    }
    assert_eq!(started, 2);
    assert_eq!(finished, 2);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_progress_snapshots_serialize_for_ipc() {
    let dir = scratch_dir("serialize");
    let inbox = dir.join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    let down = registry.create(Direction::Download, &inbox).await.unwrap();

    registry
        .feed(down, &encode_frame(&Frame::file_header("wire.bin", 80)))
        .await
        .unwrap();
    registry
        .feed(down, &encode_frame(&Frame::data(patterned_bytes(20), 0)))
        .await
        .unwrap();

    let value = serde_json::to_value(registry.snapshot(down).unwrap()).unwrap();
    assert_eq!(value["filename"], "wire.bin");
    assert_eq!(value["transferred"], 20);
    assert_eq!(value["total"], 80);
    assert_eq!(value["percent"], 25);
    assert_eq!(value["status"], "active");
    assert_eq!(value["direction"], "download");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
