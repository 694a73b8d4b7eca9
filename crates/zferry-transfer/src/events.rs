//! Lifecycle events surfaced to the embedding host.
//!
//! One `Started` per session, one `Finished` per session, in that order.
//! Delivered over the unbounded channel handed out by
//! [`TransferRegistry::new`](crate::registry::TransferRegistry::new).

use std::path::PathBuf;

use serde::Serialize;
use zferry_core::frame::Direction;

use crate::registry::SessionId;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Completed { bytes: u64 },
    Failed { reason: String },
    /// Removed by the host before reaching a terminal state.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferEvent {
    Started {
        id: SessionId,
        direction: Direction,
        /// The path the session was created with: the source file for
        /// uploads, the sink target for downloads.
        path: PathBuf,
    },
    Finished {
        id: SessionId,
        outcome: TransferOutcome,
    },
}
