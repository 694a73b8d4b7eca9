//! Stream sniffer — spots transfer handshakes inside live terminal output.
//!
//! One sniffer per logical channel. In passthrough it keeps a small sliding
//! window of recent bytes and looks for the handshake openings senders and
//! receivers print. On a hit the channel goes quiet: bytes are carried for
//! the engine instead of shown, and the owner is asked to pick a file. From
//! there the sniffer shuttles bytes between the channel and the session
//! until the engine reaches a terminal state, then drops back to
//! passthrough.
//!
//! Detection is deliberately broader than the codec. Some openings in the
//! table are not decodable frames; they only mean "a transfer tool just
//! started on the far end", and the real exchange sorts itself out once our
//! greeting goes over the wire.

use tracing::{debug, info};

use zferry_core::config::EngineConfig;
use zferry_core::consts::{HANDSHAKE_PATTERNS, ZPAD};
use zferry_core::frame::Direction;

use crate::error::TransferError;
use crate::registry::{SessionId, TransferRegistry};

/// Outbound byte budget per `poll`, so bulk uploads stream in bounded slices.
const POLL_BUDGET: usize = 64 * 1024;

/// Where the channel currently routes its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Bytes flow to the terminal; the window watches for handshakes.
    Passthrough,
    /// Handshake seen, waiting for the owner to pick a file or decline.
    Pending { direction: Direction },
    /// Bytes flow to and from the session's engine.
    Active { id: SessionId },
}

/// What the sniffer tells its owning channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnifferEvent {
    /// Show these bytes as ordinary terminal output.
    Terminal(Vec<u8>),
    /// Send these bytes to the remote end.
    Transmit(Vec<u8>),
    /// A handshake was detected; the owner should offer a file choice.
    Requested { direction: Direction },
    /// The session ended and the channel is back in passthrough.
    Finished { id: SessionId },
}

pub struct StreamSniffer {
    registry: TransferRegistry,
    state: ChannelState,
    window: Vec<u8>,
    carry: Vec<u8>,
    window_keep: usize,
    pending_carry_max: usize,
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl StreamSniffer {
    pub fn new(registry: TransferRegistry, config: &EngineConfig) -> Self {
        Self {
            registry,
            state: ChannelState::Passthrough,
            window: Vec::new(),
            carry: Vec::new(),
            window_keep: config.limits.window_keep,
            pending_carry_max: config.limits.pending_carry_max,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Route one inbound chunk according to the channel state.
    pub async fn on_bytes(&mut self, chunk: &[u8]) -> Vec<SnifferEvent> {
        match self.state {
            ChannelState::Passthrough => self.scan_passthrough(chunk),
            ChannelState::Pending { .. } => {
                self.append_carry(chunk);
                Vec::new()
            }
            ChannelState::Active { id } => {
                if let Err(e) = self.registry.feed(id, chunk).await {
                    debug!(session = %id, error = %e, "feed on a gone session");
                }
                Vec::new()
            }
        }
    }

    fn scan_passthrough(&mut self, chunk: &[u8]) -> Vec<SnifferEvent> {
        self.window.extend_from_slice(chunk);
        if self.window.len() > self.window_keep {
            let excess = self.window.len() - self.window_keep;
            self.window.drain(..excess);
        }

        let hit = HANDSHAKE_PATTERNS
            .iter()
            .filter_map(|(pattern, direction)| {
                find_sub(&self.window, pattern).map(|at| (at, *direction))
            })
            .min_by_key(|&(at, _)| at);
        let Some((mut start, direction)) = hit else {
            return vec![SnifferEvent::Terminal(chunk.to_vec())];
        };

        // Single-pad patterns can land one byte into a two-pad opening;
        // carry the whole pad run so the codec sees its marker.
        while start > 0 && self.window[start - 1] == ZPAD {
            start -= 1;
        }

        let carried = self.window.len() - start;
        self.carry = self.window.split_off(start);
        self.carry.truncate(self.pending_carry_max);
        self.window.clear();

        info!(%direction, carried, "transfer handshake detected");
        let mut events = Vec::new();
        // The part of this chunk that predates the opening still belongs on
        // screen. Bytes from earlier chunks were already shown; they ride in
        // the carry regardless.
        if chunk.len() > carried {
            events.push(SnifferEvent::Terminal(
                chunk[..chunk.len() - carried].to_vec(),
            ));
        }
        events.push(SnifferEvent::Requested { direction });
        self.state = ChannelState::Pending { direction };
        events
    }

    fn append_carry(&mut self, chunk: &[u8]) {
        let room = self.pending_carry_max.saturating_sub(self.carry.len());
        let take = chunk.len().min(room);
        self.carry.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            debug!(dropped = chunk.len() - take, "pending carry full");
        }
    }

    /// Answer a pending handshake: open the session and feed it everything
    /// carried so far. The opening output comes back on the next `poll`. On
    /// error the channel stays pending so the owner can retry or decline.
    pub async fn begin_transfer(
        &mut self,
        path: impl Into<std::path::PathBuf>,
    ) -> Result<SessionId, TransferError> {
        let ChannelState::Pending { direction } = self.state else {
            return Err(TransferError::NoPendingTransfer);
        };
        let id = self.registry.create(direction, path).await?;
        let carry = std::mem::take(&mut self.carry);
        self.registry.feed(id, &carry).await?;
        self.state = ChannelState::Active { id };
        info!(session = %id, %direction, "transfer accepted");
        Ok(id)
    }

    /// Refuse a pending handshake. The carried bytes go back to the
    /// terminal and the channel resumes passthrough.
    pub fn decline(&mut self) -> Vec<SnifferEvent> {
        if !matches!(self.state, ChannelState::Pending { .. }) {
            return Vec::new();
        }
        info!("transfer declined");
        self.state = ChannelState::Passthrough;
        let carry = std::mem::take(&mut self.carry);
        if carry.is_empty() {
            Vec::new()
        } else {
            vec![SnifferEvent::Terminal(carry)]
        }
    }

    /// Drain outbound bytes from the active session and notice its end.
    /// No-op outside `Active`.
    pub async fn poll(&mut self) -> Vec<SnifferEvent> {
        let ChannelState::Active { id } = self.state else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let mut outbound = Vec::new();
        while outbound.len() < POLL_BUDGET {
            match self.registry.pull(id, 4096).await {
                Ok(bytes) if bytes.is_empty() => break,
                Ok(bytes) => outbound.extend_from_slice(&bytes),
                Err(e) => {
                    debug!(session = %id, error = %e, "pull on a gone session");
                    break;
                }
            }
        }
        if !outbound.is_empty() {
            events.push(SnifferEvent::Transmit(outbound));
        }

        let done = self
            .registry
            .state(id)
            .map(|s| s.is_terminal())
            .unwrap_or(true);
        if done {
            self.registry.remove(id).await;
            self.state = ChannelState::Passthrough;
            events.push(SnifferEvent::Finished { id });
            info!(session = %id, "channel back to passthrough");
        }
        events
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
