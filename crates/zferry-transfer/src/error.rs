//! Transfer-level failure taxonomy.
//!
//! Malformed wire input never lands here; the codec resyncs past it. These
//! are the session-fatal conditions and the caller mistakes.

use std::path::PathBuf;

use crate::registry::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Source or sink file I/O failed. Fatal for the session.
    #[error("file i/o on {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Peer rejected the last frame.
    #[error("peer sent a negative-ack")]
    PeerNak,

    /// Peer cancelled the transfer.
    #[error("peer aborted the transfer")]
    PeerAbort,

    /// Registry refused the session because shutdown is in progress.
    #[error("shutting down, no new transfers")]
    ShuttingDown,

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// `begin_transfer` without a detected handshake to answer.
    #[error("no transfer is pending on this channel")]
    NoPendingTransfer,
}
