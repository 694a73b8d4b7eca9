//! Progress snapshots and the periodic reporter task.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use zferry_core::frame::Direction;

use crate::engine::{SessionStats, TransferStatus};
use crate::registry::{SessionId, TransferRegistry};

/// Point-in-time view of one transfer, cheap enough to take on a timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub direction: Direction,
    pub filename: String,
    pub transferred: u64,
    pub total: u64,
    /// 0..=100. Zero while the total is still unknown; capped when a peer
    /// sends more than it announced.
    pub percent: u8,
    pub status: TransferStatus,
}

impl ProgressSnapshot {
    /// Read the shared counters. Never touches the engine lock.
    pub fn read(session_id: SessionId, direction: Direction, stats: &SessionStats) -> Self {
        let transferred = stats.transferred();
        let total = stats.total();
        let percent = if total == 0 {
            0
        } else {
            (transferred.saturating_mul(100) / total).min(100) as u8
        };
        Self {
            session_id,
            direction,
            filename: stats.name(),
            transferred,
            total,
            percent,
            status: stats.state().status(),
        }
    }
}

/// Consumer of periodic progress batches. Object-safe so hosts can hand in
/// anything from a log writer to an IPC pusher.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, snapshots: &[ProgressSnapshot]);
}

/// Spawn a task that pushes `snapshot_all` to the sink every `interval`
/// until the registry shuts down. Ticks with no live sessions publish
/// nothing.
pub fn spawn_progress_reporter(
    registry: TransferRegistry,
    interval: Duration,
    sink: Arc<dyn ProgressSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if registry.is_shut_down() {
                debug!("progress reporter stopping");
                break;
            }
            let snapshots = registry.snapshot_all();
            if !snapshots.is_empty() {
                sink.publish(&snapshots);
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
