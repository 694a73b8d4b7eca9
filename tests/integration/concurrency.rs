//! Many sessions on one registry at once.

use std::time::Duration;

use crate::*;
use zferry_core::codec::encode_frame;

#[tokio::test]
async fn test_parallel_transfers_never_cross_streams() {
    let dir = scratch_dir("parallel");
    let (registry, _events) = TransferRegistry::new(EngineConfig::default());

    let mut tasks = Vec::new();
    for lane in 0..4u8 {
        let source = dir.join(format!("lane-{lane}.bin"));
        let mut body = patterned_bytes(20_000);
        body.iter_mut().for_each(|b| *b ^= lane);
        tokio::fs::write(&source, &body).await.unwrap();
        let inbox = dir.join(format!("inbox-{lane}"));
        std::fs::create_dir_all(&inbox).unwrap();

        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let up = registry.create(Direction::Upload, &source).await.unwrap();
            let down = registry.create(Direction::Download, &inbox).await.unwrap();
            pump(&registry, up, down).await.unwrap();
            assert_eq!(registry.state(up), Some(SessionState::Completed));
            assert_eq!(registry.state(down), Some(SessionState::Completed));
            (inbox.join(format!("lane-{lane}.bin")), body)
        }));
    }

    for task in tasks {
        let (landed_path, body) = task.await.unwrap();
        let landed = tokio::fs::read(&landed_path).await.unwrap();
        assert_eq!(landed, body, "each lane keeps its own bytes");
    }

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_snapshot_all_reports_every_live_session() {
    let dir = scratch_dir("snapshot-all");
    let (registry, _events) = TransferRegistry::new(EngineConfig::default());

    let mut ids = Vec::new();
    for i in 0..3u64 {
        let inbox = dir.join(format!("inbox-{i}"));
        std::fs::create_dir_all(&inbox).unwrap();
        let id = registry.create(Direction::Download, &inbox).await.unwrap();
        registry
            .feed(
                id,
                &encode_frame(&Frame::file_header(&format!("f{i}.bin"), 100)),
            )
            .await
            .unwrap();
        registry
            .feed(
                id,
                &encode_frame(&Frame::data(patterned_bytes(10 * (i as usize + 1)), 0)),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    let all = registry.snapshot_all();
    assert_eq!(all.len(), 3);
    for (i, snap) in all.iter().enumerate() {
        assert_eq!(snap.session_id, ids[i], "sorted by id");
        assert_eq!(snap.filename, format!("f{i}.bin"));
        assert_eq!(snap.transferred, 10 * (i as u64 + 1));
    }

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_stalled_reports_only_quiet_sessions() {
    let dir = scratch_dir("stalled");
    let (registry, _events) = TransferRegistry::new(EngineConfig::default());

    let inbox_a = dir.join("a");
    let inbox_b = dir.join("b");
    std::fs::create_dir_all(&inbox_a).unwrap();
    std::fs::create_dir_all(&inbox_b).unwrap();
    let quiet = registry.create(Direction::Download, &inbox_a).await.unwrap();
    let busy = registry.create(Direction::Download, &inbox_b).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    registry
        .feed(busy, &encode_frame(&Frame::data(patterned_bytes(8), 0)))
        .await
        .unwrap();

    let stalled = registry.stalled(Duration::from_millis(50));
    assert!(stalled.contains(&quiet));
    assert!(!stalled.contains(&busy), "fresh progress is not a stall");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
