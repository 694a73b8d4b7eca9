//! Channel-level scenarios: a sniffer mediating one terminal stream
//! against a stand-in peer engine on the far side.

use crate::*;
use zferry_transfer::{ChannelState, Engine, SnifferEvent, StreamSniffer};

/// Shuttle bytes between the sniffer's channel and the peer engine until
/// the channel returns to passthrough. Returns every sniffer event seen.
async fn bridge(sniffer: &mut StreamSniffer, peer: &mut Engine) -> Vec<SnifferEvent> {
    let mut seen = Vec::new();
    for _ in 0..1000 {
        for event in sniffer.poll().await {
            if let SnifferEvent::Transmit(bytes) = &event {
                peer.feed(bytes).await;
            }
            seen.push(event);
        }
        let outbound = peer.pull(4096).await;
        if !outbound.is_empty() {
            seen.extend(sniffer.on_bytes(&outbound).await);
        }
        if sniffer.state() == ChannelState::Passthrough && peer.is_terminal() {
            return seen;
        }
    }
    panic!("bridge did not settle");
}

#[tokio::test]
async fn test_remote_sender_lands_a_download_through_the_channel() {
    let dir = scratch_dir("chan-down");
    let peer_file = dir.join("from-remote.bin");
    let body = patterned_bytes(9000);
    tokio::fs::write(&peer_file, &body).await.unwrap();
    let inbox = dir.join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    let mut sniffer = StreamSniffer::new(registry, &EngineConfig::default());
    let mut peer = Engine::new_upload(&peer_file, &EngineConfig::default())
        .await
        .unwrap();

    // The remote tool announces itself in hex before its first frame.
    let events = sniffer.on_bytes(b"**\x18B0000000000be50\r\n").await;
    assert!(events.contains(&SnifferEvent::Requested {
        direction: Direction::Download
    }));

    let id = sniffer.begin_transfer(&inbox).await.unwrap();
    let seen = bridge(&mut sniffer, &mut peer).await;
    assert!(seen.contains(&SnifferEvent::Finished { id }));

    let landed = tokio::fs::read(inbox.join("from-remote.bin")).await.unwrap();
    assert_eq!(landed, body);

    // Ordinary output flows again once the session is gone.
    let after = sniffer.on_bytes(b"logout\r\n").await;
    assert_eq!(after, vec![SnifferEvent::Terminal(b"logout\r\n".to_vec())]);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_remote_receiver_pulls_an_upload_through_the_channel() {
    let dir = scratch_dir("chan-up");
    let source = dir.join("outgoing.txt");
    let body = patterned_bytes(3000);
    tokio::fs::write(&source, &body).await.unwrap();
    let peer_inbox = dir.join("peer-inbox");
    std::fs::create_dir_all(&peer_inbox).unwrap();

    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    let mut sniffer = StreamSniffer::new(registry, &EngineConfig::default());
    let mut peer = Engine::new_download(&peer_inbox, &EngineConfig::default());

    let events = sniffer.on_bytes(b"**\x18B0100000023be50\r\n").await;
    assert!(events.contains(&SnifferEvent::Requested {
        direction: Direction::Upload
    }));

    let id = sniffer.begin_transfer(&source).await.unwrap();
    let seen = bridge(&mut sniffer, &mut peer).await;
    assert!(seen.contains(&SnifferEvent::Finished { id }));

    let landed = tokio::fs::read(peer_inbox.join("outgoing.txt"))
        .await
        .unwrap();
    assert_eq!(landed, body);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_declined_offer_returns_the_channel_to_passthrough() {
    let (registry, _events) = TransferRegistry::new(EngineConfig::default());
    let mut sniffer = StreamSniffer::new(registry, &EngineConfig::default());

    sniffer.on_bytes(b"**\x18B0000000000be50").await;
    assert!(matches!(sniffer.state(), ChannelState::Pending { .. }));

    let released = sniffer.decline();
    assert!(matches!(released[0], SnifferEvent::Terminal(_)));
    assert_eq!(sniffer.state(), ChannelState::Passthrough);

    // The same greeting later triggers a fresh offer; remote tools retry.
    let events = sniffer.on_bytes(b"**\x18B0000000000be50").await;
    assert!(events.contains(&SnifferEvent::Requested {
        direction: Direction::Download
    }));
}
