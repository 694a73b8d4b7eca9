//! zferry-transfer — session engines, handshake sniffing, and progress.
//! Hosts embed this crate once per terminal channel they mediate.

pub mod engine;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod progress;
pub mod registry;
pub mod sniffer;

pub use engine::{Engine, SessionState, TransferStatus};
pub use error::TransferError;
pub use events::{TransferEvent, TransferOutcome};
pub use progress::{spawn_progress_reporter, ProgressSink, ProgressSnapshot};
pub use registry::{SessionId, TransferRegistry};
pub use sniffer::{ChannelState, SnifferEvent, StreamSniffer};
