//! Hostile-input scenarios: fragmentation, noise, and corrupted frames.

use std::path::PathBuf;

use crate::*;
use zferry_core::codec::encode_frame;

/// One receive session fed a prepared wire image, checked for completion.
async fn run_download(wire_parts: &[&[u8]], tag: &str) -> (TransferRegistry, SessionId, PathBuf) {
    let dir = scratch_dir(tag);
    let (registry, _) = TransferRegistry::new(EngineConfig::default());
    let id = registry.create(Direction::Download, &dir).await.unwrap();
    for part in wire_parts {
        registry.feed(id, part).await.unwrap();
    }
    (registry, id, dir)
}

fn full_session_wire(payload: &[u8]) -> Vec<u8> {
    let mut wire = Vec::new();
    wire.extend_from_slice(&encode_frame(&Frame::file_header("w.bin", payload.len() as u64)));
    wire.extend_from_slice(&encode_frame(&Frame::data(payload.to_vec(), 0)));
    wire.extend_from_slice(&encode_frame(&Frame::zeof(payload.len() as u32)));
    wire
}

#[tokio::test]
async fn test_session_completes_when_split_at_any_byte() {
    let wire = full_session_wire(b"split me");
    for split in 1..wire.len() {
        let (registry, id, dir) =
            run_download(&[&wire[..split], &wire[split..]], "any-split").await;
        assert_eq!(
            registry.state(id),
            Some(SessionState::Completed),
            "split at {split}"
        );
        assert_eq!(registry.snapshot(id).unwrap().transferred, 8, "split at {split}");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}

#[tokio::test]
async fn test_byte_at_a_time_delivery_still_completes() {
    let wire = full_session_wire(&patterned_bytes(100));
    let dir = scratch_dir("dribble");
    let (registry, _) = TransferRegistry::new(EngineConfig::default());
    let id = registry.create(Direction::Download, &dir).await.unwrap();
    for byte in &wire {
        registry.feed(id, std::slice::from_ref(byte)).await.unwrap();
    }
    assert_eq!(registry.state(id), Some(SessionState::Completed));
    assert_eq!(registry.snapshot(id).unwrap().transferred, 100);
    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_line_noise_between_frames_is_ignored() {
    let payload = patterned_bytes(64);
    let mut wire = Vec::new();
    wire.extend_from_slice(b"\x07\x07carrier detected\r\n");
    wire.extend_from_slice(&encode_frame(&Frame::file_header("noisy.bin", 64)));
    wire.extend_from_slice(b"\xff\xfe\xfd line hit ");
    wire.extend_from_slice(&encode_frame(&Frame::data(payload.clone(), 0)));
    wire.extend_from_slice(b"***");
    wire.extend_from_slice(&encode_frame(&Frame::zeof(64)));

    let (registry, id, dir) = run_download(&[&wire], "noise").await;
    assert_eq!(registry.state(id), Some(SessionState::Completed));
    assert_eq!(registry.snapshot(id).unwrap().transferred, 64);
    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_corrupted_data_frame_is_dropped_and_the_stream_recovers() {
    let mut corrupt = encode_frame(&Frame::data(b"abcdef".to_vec(), 0));
    // First payload byte sits after pads, zdle, format, type, and four
    // flag bytes, all raw for this frame. The flip breaks only the crc.
    corrupt[9] ^= 0x01;

    let header = encode_frame(&Frame::file_header("r.bin", 6));
    let good = encode_frame(&Frame::data(b"abcdef".to_vec(), 0));
    let eof = encode_frame(&Frame::zeof(6));

    let (registry, id, dir) =
        run_download(&[&header, &corrupt, &good, &eof], "corrupt").await;
    assert_eq!(registry.state(id), Some(SessionState::Completed));
    assert_eq!(
        registry.snapshot(id).unwrap().transferred,
        6,
        "only the intact copy counts"
    );

    let landed = tokio::fs::read(dir.join("r.bin")).await.unwrap();
    assert_eq!(landed, b"abcdef");
    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_failed_session_ignores_later_frames() {
    let abort = encode_frame(&Frame::header(zferry_core::frame::FrameKind::ZABORT, 0));
    let late = encode_frame(&Frame::data(b"too late".to_vec(), 0));

    let (registry, id, dir) = run_download(&[&abort, &late], "late").await;
    assert_eq!(registry.state(id), Some(SessionState::Failed));
    assert_eq!(registry.snapshot(id).unwrap().transferred, 0);
    let _ = tokio::fs::remove_dir_all(&dir).await;
}
