//! Session registry — id allocation, the live-session table, lifecycle events.
//!
//! Handles live in a `DashMap` keyed by session id. Each handle owns its
//! engine behind a tokio `Mutex`, so `feed` and `pull` for one session never
//! interleave while different sessions run fully in parallel. Callers clone
//! the `Arc` handle out of the map before locking; no map shard is ever held
//! across an await.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use zferry_core::config::EngineConfig;
use zferry_core::frame::Direction;

use crate::engine::{Engine, SessionState, SessionStats};
use crate::error::TransferError;
use crate::events::{TransferEvent, TransferOutcome};
use crate::progress::ProgressSnapshot;

/// Opaque per-transfer identifier, unique for the registry's lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SessionHandle {
    id: SessionId,
    direction: Direction,
    path: PathBuf,
    engine: Mutex<Engine>,
    stats: Arc<SessionStats>,
    /// Guard so `fail` and `remove` emit exactly one Finished event.
    finished_emitted: AtomicBool,
}

/// Shared, cloneable handle to the session table.
#[derive(Clone)]
pub struct TransferRegistry {
    sessions: Arc<DashMap<SessionId, Arc<SessionHandle>>>,
    next_id: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<TransferEvent>,
    config: Arc<EngineConfig>,
    shutdown: Arc<AtomicBool>,
}

impl TransferRegistry {
    /// Build a registry and the receiving end of its lifecycle event stream.
    pub fn new(config: EngineConfig) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            sessions: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            events,
            config: Arc::new(config),
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        (registry, rx)
    }

    /// Open a new session. Uploads open and stat the source here; downloads
    /// only record the target, the sink file appears when the peer names one.
    pub async fn create(
        &self,
        direction: Direction,
        path: impl Into<PathBuf>,
    ) -> Result<SessionId, TransferError> {
        if self.is_shut_down() {
            return Err(TransferError::ShuttingDown);
        }
        let path = path.into();
        let engine = match direction {
            Direction::Upload => Engine::new_upload(&path, &self.config).await?,
            Direction::Download => Engine::new_download(&path, &self.config),
        };
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(SessionHandle {
            id,
            direction,
            path: path.clone(),
            stats: engine.stats(),
            engine: Mutex::new(engine),
            finished_emitted: AtomicBool::new(false),
        });
        self.sessions.insert(id, handle);
        info!(session = %id, %direction, path = %path.display(), "session created");
        let _ = self.events.send(TransferEvent::Started {
            id,
            direction,
            path,
        });
        Ok(id)
    }

    fn handle(&self, id: SessionId) -> Result<Arc<SessionHandle>, TransferError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TransferError::UnknownSession(id))
    }

    /// Push inbound transport bytes into one session's engine.
    pub async fn feed(&self, id: SessionId, bytes: &[u8]) -> Result<(), TransferError> {
        let handle = self.handle(id)?;
        handle.engine.lock().await.feed(bytes).await;
        Ok(())
    }

    /// Drain up to `max_bytes` of one session's outbound bytes.
    pub async fn pull(&self, id: SessionId, max_bytes: usize) -> Result<Vec<u8>, TransferError> {
        let handle = self.handle(id)?;
        let bytes = handle.engine.lock().await.pull(max_bytes).await;
        Ok(bytes)
    }

    /// Current protocol state, straight from the shared counters.
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|h| h.stats.state())
    }

    /// Progress view of one session. Never locks the engine.
    pub fn snapshot(&self, id: SessionId) -> Option<ProgressSnapshot> {
        self.sessions
            .get(&id)
            .map(|h| ProgressSnapshot::read(h.id, h.direction, &h.stats))
    }

    /// Progress views of every live session, sorted by id.
    pub fn snapshot_all(&self) -> Vec<ProgressSnapshot> {
        let mut all: Vec<ProgressSnapshot> = self
            .sessions
            .iter()
            .map(|h| ProgressSnapshot::read(h.id, h.direction, &h.stats))
            .collect();
        all.sort_by_key(|s| s.session_id.0);
        all
    }

    /// Mark a session failed with a reason and emit its Finished event. The
    /// session stays in the table until `remove`.
    pub async fn fail(&self, id: SessionId, reason: &str) -> bool {
        let Ok(handle) = self.handle(id) else {
            return false;
        };
        {
            let mut engine = handle.engine.lock().await;
            engine.fail(reason);
        }
        self.emit_finished(&handle, TransferOutcome::Failed {
            reason: reason.to_string(),
        });
        true
    }

    /// Take a session out of the table, flushing and closing its file. Safe
    /// in any state; removal mid-transfer reads as an abort.
    pub async fn remove(&self, id: SessionId) -> bool {
        let Some((_, handle)) = self.sessions.remove(&id) else {
            return false;
        };
        let outcome = {
            let mut engine = handle.engine.lock().await;
            engine.finalize().await;
            match engine.state() {
                SessionState::Completed => TransferOutcome::Completed {
                    bytes: engine.transferred(),
                },
                SessionState::Failed => TransferOutcome::Failed {
                    reason: engine.last_error().unwrap_or("unknown").to_string(),
                },
                _ => TransferOutcome::Aborted,
            }
        };
        debug!(session = %id, ?outcome, "session removed");
        self.emit_finished(&handle, outcome);
        true
    }

    /// Live sessions with no progress for at least `min_idle`. Candidates
    /// for cancellation; the registry itself never times a session out.
    pub fn stalled(&self, min_idle: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|h| !h.stats.state().is_terminal() && h.stats.idle_for() >= min_idle)
            .map(|h| h.id)
            .collect()
    }

    /// Ids of sessions not yet terminal.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|h| !h.stats.state().is_terminal())
            .map(|h| h.id)
            .collect()
    }

    /// Raise the shutdown flag. New `create` calls are refused; existing
    /// sessions keep running until removed.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        info!("registry shutdown requested");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Recorded target path of a session (upload source or download target).
    pub fn path(&self, id: SessionId) -> Option<PathBuf> {
        self.sessions.get(&id).map(|h| h.path.clone())
    }

    fn emit_finished(&self, handle: &SessionHandle, outcome: TransferOutcome) {
        if handle.finished_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(TransferEvent::Finished {
            id: handle.id,
            outcome,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
