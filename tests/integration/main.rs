//! zferry integration harness.
//!
//! Scenarios couple real engines back-to-back in process: every byte one
//! side emits is fed verbatim to the other, the way a host bridges a
//! channel. No PTY and no network; the protocol rides plain byte buffers,
//! so the tests do too.
//!
//! Each test works in its own scratch directory and cleans up after
//! itself. Nothing here touches user or system paths.

use std::path::PathBuf;

use anyhow::Result;
use zferry_core::codec::FrameDecoder;

pub use zferry_core::config::EngineConfig;
pub use zferry_core::frame::{Direction, Frame};
pub use zferry_transfer::{SessionId, SessionState, TransferRegistry};

mod channel;
mod concurrency;
mod resilience;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Fresh scratch directory, unique per test and process.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("zferry-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

/// Deterministic filler for test payloads.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

/// Decode a byte run into complete frames, panicking on anything malformed.
pub fn frames_in(bytes: &[u8]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    decoder.push(bytes);
    let mut frames = Vec::new();
    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(e) => panic!("undecodable engine output: {e}"),
        }
    }
    frames
}

/// Shuttle bytes between two sessions of one registry until both reach a
/// terminal state. Bails if the exchange does not settle.
pub async fn pump(registry: &TransferRegistry, a: SessionId, b: SessionId) -> Result<()> {
    for _ in 0..1000 {
        let from_a = registry.pull(a, 4096).await?;
        registry.feed(b, &from_a).await?;
        let from_b = registry.pull(b, 4096).await?;
        registry.feed(a, &from_b).await?;

        let settled = registry.state(a).map(|s| s.is_terminal()).unwrap_or(true)
            && registry.state(b).map(|s| s.is_terminal()).unwrap_or(true);
        if settled {
            return Ok(());
        }
    }
    anyhow::bail!("exchange did not settle within the iteration cap")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_harness_pump_settles_a_small_roundtrip() {
    let dir = scratch_dir("harness");
    let source = dir.join("hello.txt");
    tokio::fs::write(&source, b"hello, zferry").await.unwrap();
    let inbox = dir.join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    let up = registry.create(Direction::Upload, &source).await.unwrap();
    let down = registry.create(Direction::Download, &inbox).await.unwrap();
    pump(&registry, up, down).await.unwrap();

    assert_eq!(registry.state(up), Some(SessionState::Completed));
    assert_eq!(registry.state(down), Some(SessionState::Completed));
    let landed = tokio::fs::read(inbox.join("hello.txt")).await.unwrap();
    assert_eq!(landed, b"hello, zferry");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
