//! Per-session transfer state machine.
//!
//! One engine per active transfer. `feed` pushes inbound transport bytes
//! through the frame decoder and dispatches each frame against the current
//! state; `pull` drains queued outbound bytes, synthesizing data frames on
//! demand while sending. File I/O goes through tokio's async fs so a slow
//! disk never stalls the caller's event loop.
//!
//! Decode errors resync inside the decoder and are counted here, never
//! surfaced. A file error fails the session with a recorded reason; the
//! first failure wins. Frames that make no sense for the current state are
//! logged and ignored (peers send what they send).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use zferry_core::codec::{encode_frame, DecodeOpts, FrameDecoder};
use zferry_core::config::EngineConfig;
use zferry_core::frame::{Direction, FileHeader, Frame, FrameKind};

use crate::error::TransferError;
use crate::fsutil;

// ── Session state ─────────────────────────────────────────────────────────────

/// Protocol position of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    SendingHeader = 1,
    SendingData = 2,
    SendingEof = 3,
    ReceivingHeader = 4,
    ReceivingData = 5,
    Completed = 6,
    Failed = 7,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Coarse view for progress surfaces.
    pub fn status(self) -> TransferStatus {
        match self {
            Self::Idle => TransferStatus::Idle,
            Self::Completed => TransferStatus::Completed,
            Self::Failed => TransferStatus::Error,
            _ => TransferStatus::Active,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::SendingHeader,
            2 => Self::SendingData,
            3 => Self::SendingEof,
            4 => Self::ReceivingHeader,
            5 => Self::ReceivingData,
            6 => Self::Completed,
            7 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// What a UI needs to know about a session, and nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Idle,
    Active,
    Completed,
    Error,
}

// ── Shared counters ───────────────────────────────────────────────────────────

/// Progress counters shared between an engine and its readers.
///
/// The engine writes under its own lock; snapshot readers never take that
/// lock, they read these atomics.
pub struct SessionStats {
    epoch: Instant,
    state: AtomicU8,
    transferred: AtomicU64,
    total: AtomicU64,
    last_progress_ms: AtomicU64,
    name: RwLock<String>,
}

impl SessionStats {
    fn new(state: SessionState, name: String) -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            state: AtomicU8::new(state as u8),
            transferred: AtomicU64::new(0),
            total: AtomicU64::new(0),
            last_progress_ms: AtomicU64::new(0),
            name: RwLock::new(name),
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_tag(self.state.load(Ordering::Acquire))
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Time since the last byte of progress (or since creation).
    pub fn idle_for(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_progress_ms.load(Ordering::Relaxed)))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn set_name(&self, name: &str) {
        *self.name.write().unwrap_or_else(|p| p.into_inner()) = name.to_string();
    }

    fn record_progress(&self, transferred: u64) {
        self.transferred.store(transferred, Ordering::Relaxed);
        self.last_progress_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// The per-transfer protocol state machine.
pub struct Engine {
    direction: Direction,
    state: SessionState,
    stats: Arc<SessionStats>,

    decoder: FrameDecoder,
    outbound: BytesMut,

    /// Upload: the source file path. Download: the sink target, either a
    /// full file path or a directory the header name lands in.
    target: PathBuf,
    /// Actual sink path once the download file exists.
    resolved: Option<PathBuf>,
    file: Option<File>,
    file_name: String,
    file_size: u64,
    transferred: u64,

    chunk_size: usize,
    max_frames_per_feed: u32,
    malformed_frames: u64,
    last_error: Option<String>,
}

fn decode_opts(config: &EngineConfig) -> DecodeOpts {
    DecodeOpts {
        validate_crc: config.transfer.validate_checksums,
        max_payload: config.limits.max_payload,
        scan_keep: config.limits.scan_keep,
    }
}

impl Engine {
    /// Sending side: open and stat the source, queue its file header.
    pub async fn new_upload(
        path: impl Into<PathBuf>,
        config: &EngineConfig,
    ) -> Result<Self, TransferError> {
        let path = path.into();
        let file = File::open(&path).await.map_err(|e| TransferError::File {
            path: path.clone(),
            source: e,
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TransferError::File {
                path: path.clone(),
                source: e,
            })?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        let stats = SessionStats::new(SessionState::SendingHeader, name.clone());
        stats.set_total(size);

        let mut engine = Self {
            direction: Direction::Upload,
            state: SessionState::SendingHeader,
            stats,
            decoder: FrameDecoder::with_opts(decode_opts(config)),
            outbound: BytesMut::new(),
            target: path,
            resolved: None,
            file: Some(file),
            file_name: name.clone(),
            file_size: size,
            transferred: 0,
            chunk_size: config.transfer.chunk_size,
            max_frames_per_feed: config.limits.max_frames_per_feed,
            malformed_frames: 0,
            last_error: None,
        };
        engine.queue(&Frame::file_header(&name, size));
        info!(file = %engine.target.display(), size, "upload session ready");
        Ok(engine)
    }

    /// Receiving side: record the sink target and greet the sender. The
    /// sink file is created once the peer names a file (or sends data).
    pub fn new_download(target: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        let target = target.into();
        let mut engine = Self {
            direction: Direction::Download,
            state: SessionState::ReceivingHeader,
            stats: SessionStats::new(SessionState::ReceivingHeader, String::new()),
            decoder: FrameDecoder::with_opts(decode_opts(config)),
            outbound: BytesMut::new(),
            target,
            resolved: None,
            file: None,
            file_name: String::new(),
            file_size: 0,
            transferred: 0,
            chunk_size: config.transfer.chunk_size,
            max_frames_per_feed: config.limits.max_frames_per_feed,
            malformed_frames: 0,
            last_error: None,
        };
        engine.queue(&Frame::zrinit());
        info!(target = %engine.target.display(), "download session ready");
        engine
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Push raw transport bytes through the decoder and dispatch every
    /// complete frame. Bounded per call; decode errors are counted and end
    /// the call, the next one rescans from the resync point.
    pub async fn feed(&mut self, bytes: &[u8]) {
        if self.state == SessionState::Failed {
            return;
        }
        self.decoder.push(bytes);
        for _ in 0..self.max_frames_per_feed {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => self.handle_frame(frame).await,
                Ok(None) => break,
                Err(e) => {
                    self.malformed_frames += 1;
                    debug!(error = %e, count = self.malformed_frames, "malformed frame, resynced");
                    break;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        trace!(kind = ?frame.kind, state = ?self.state, "dispatch");
        match frame.kind {
            FrameKind::ZNAK if !self.state.is_terminal() => {
                self.fail_with(&TransferError::PeerNak);
            }
            FrameKind::ZABORT if !self.state.is_terminal() => {
                self.fail_with(&TransferError::PeerAbort);
            }
            // Echo the close exactly once; a second ZFIN is the peer
            // echoing ours back. Failed sessions stay failed.
            FrameKind::ZFIN => {
                if !self.state.is_terminal() {
                    self.queue(&Frame::zfin());
                    self.complete().await;
                }
            }
            _ => match self.direction {
                Direction::Download => self.on_download_frame(frame).await,
                Direction::Upload => self.on_upload_frame(frame).await,
            },
        }
    }

    async fn on_download_frame(&mut self, frame: Frame) {
        match frame.kind {
            FrameKind::ZSINIT => self.queue(&Frame::zack(0)),
            FrameKind::ZFILE => {
                if self.state != SessionState::ReceivingHeader {
                    debug!("file header after data started, ignored");
                    return;
                }
                let Some(header) = FileHeader::parse(&frame.payload) else {
                    debug!(len = frame.payload.len(), "unparseable file header, ignored");
                    return;
                };
                self.file_name = fsutil::sanitize_filename(&header.name);
                self.file_size = header.size;
                self.stats.set_name(&self.file_name);
                self.stats.set_total(header.size);
                if let Err(e) = self.open_sink().await {
                    self.fail_with(&e);
                    return;
                }
                self.set_state(SessionState::ReceivingData);
                self.queue(&Frame::zack(0));
                info!(file = %self.file_name, size = self.file_size, "receiving file");
            }
            FrameKind::ZDATA => {
                if self.state == SessionState::ReceivingHeader {
                    // Peer skipped the file header; take the data anyway.
                    if let Err(e) = self.open_sink().await {
                        self.fail_with(&e);
                        return;
                    }
                    self.set_state(SessionState::ReceivingData);
                }
                if self.state != SessionState::ReceivingData {
                    debug!(state = ?self.state, "data frame outside receive window, ignored");
                    return;
                }
                if let Err(e) = self.write_sink(&frame.payload).await {
                    self.fail_with(&e);
                    return;
                }
                self.transferred += frame.payload.len() as u64;
                self.stats.record_progress(self.transferred);
                self.queue(&Frame::zrpos(self.transferred as u32));
            }
            FrameKind::ZEOF => {
                if self.state.is_terminal() {
                    return;
                }
                self.queue(&Frame::zack(self.transferred as u32));
                self.queue(&Frame::zfin());
                self.complete().await;
            }
            other => debug!(kind = ?other, state = ?self.state, "frame ignored"),
        }
    }

    async fn on_upload_frame(&mut self, frame: Frame) {
        match frame.kind {
            // Receivers vary in which confirmation they send first.
            FrameKind::ZRINIT | FrameKind::ZACK | FrameKind::ZRPOS
                if self.state == SessionState::SendingHeader =>
            {
                if self.file_size == 0 {
                    // Nothing to stream; close the file out immediately.
                    self.queue(&Frame::zeof(0));
                    self.set_state(SessionState::SendingEof);
                } else {
                    self.set_state(SessionState::SendingData);
                }
            }
            FrameKind::ZRINIT | FrameKind::ZACK if self.state == SessionState::SendingEof => {
                // Initiate the close ourselves; receivers that wait for our
                // ZFIN would otherwise deadlock against us waiting for theirs.
                self.queue(&Frame::zfin());
                self.complete().await;
            }
            other => debug!(kind = ?other, state = ?self.state, "frame ignored"),
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Drain up to `max_bytes` of queued output. While `SendingData` an
    /// empty queue is refilled with the next data frame first, so callers
    /// just pull until nothing comes back. Frames split across pulls; the
    /// transport is a byte stream.
    pub async fn pull(&mut self, max_bytes: usize) -> Vec<u8> {
        if self.outbound.is_empty() && self.state == SessionState::SendingData {
            self.synthesize_data().await;
        }
        let n = max_bytes.min(self.outbound.len());
        self.outbound.split_to(n).to_vec()
    }

    async fn synthesize_data(&mut self) {
        let path = self.target.clone();
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut chunk = vec![0u8; self.chunk_size];
        match file.read(&mut chunk).await {
            Ok(0) => {
                self.queue(&Frame::zeof(self.transferred as u32));
                self.set_state(SessionState::SendingEof);
                debug!(transferred = self.transferred, "source exhausted, eof queued");
            }
            Ok(n) => {
                chunk.truncate(n);
                let position = self.transferred as u32;
                self.queue(&Frame::data(chunk, position));
                self.transferred += n as u64;
                self.stats.record_progress(self.transferred);
            }
            Err(e) => self.fail_with(&TransferError::File { path, source: e }),
        }
    }

    fn queue(&mut self, frame: &Frame) {
        trace!(kind = ?frame.kind, flags = frame.flags, "queue frame");
        self.outbound.extend_from_slice(&encode_frame(frame));
    }

    // ── Sink plumbing ─────────────────────────────────────────────────────────

    async fn open_sink(&mut self) -> Result<(), TransferError> {
        if self.file.is_some() {
            return Ok(());
        }
        let is_dir = tokio::fs::metadata(&self.target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let (path, file) = if is_dir {
            let name = if self.file_name.is_empty() {
                "unnamed"
            } else {
                self.file_name.as_str()
            };
            fsutil::create_unique(&self.target, name)
                .await
                .map_err(|e| TransferError::File {
                    path: self.target.clone(),
                    source: e,
                })?
        } else {
            let file = File::create(&self.target)
                .await
                .map_err(|e| TransferError::File {
                    path: self.target.clone(),
                    source: e,
                })?;
            (self.target.clone(), file)
        };
        info!(path = %path.display(), "sink file created");
        self.resolved = Some(path);
        self.file = Some(file);
        Ok(())
    }

    async fn write_sink(&mut self, data: &[u8]) -> Result<(), TransferError> {
        let path = self.sink_path();
        let Some(file) = self.file.as_mut() else {
            debug!(bytes = data.len(), "no sink file open, dropping data");
            return Ok(());
        };
        file.write_all(data).await.map_err(|e| TransferError::File {
            path,
            source: e,
        })
    }

    async fn sync_sink(&mut self) -> Result<(), TransferError> {
        if self.direction == Direction::Download {
            let path = self.sink_path();
            if let Some(file) = self.file.as_mut() {
                file.sync_all().await.map_err(|e| TransferError::File {
                    path,
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    fn sink_path(&self) -> PathBuf {
        self.resolved.clone().unwrap_or_else(|| self.target.clone())
    }

    // ── Terminal transitions ──────────────────────────────────────────────────

    async fn complete(&mut self) {
        if self.state == SessionState::Completed {
            return;
        }
        match self.sync_sink().await {
            Ok(()) => {
                self.set_state(SessionState::Completed);
                info!(
                    direction = %self.direction,
                    file = %self.file_name,
                    transferred = self.transferred,
                    "transfer complete"
                );
            }
            Err(e) => self.fail_with(&e),
        }
    }

    /// Mark the session failed. The first recorded reason sticks; calls on
    /// an already-terminal session do nothing.
    pub fn fail(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        if self.last_error.is_none() {
            self.last_error = Some(reason.to_string());
        }
        self.set_state(SessionState::Failed);
        warn!(reason, "transfer failed");
    }

    fn fail_with(&mut self, err: &TransferError) {
        self.fail(&err.to_string());
    }

    /// Best-effort sink flush before the handle drops. Dropping the engine
    /// closes the file either way.
    pub async fn finalize(&mut self) {
        if self.direction == Direction::Download {
            if let Some(file) = self.file.as_mut() {
                if let Err(e) = file.sync_all().await {
                    warn!(error = %e, "sink sync on close failed");
                }
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "state");
        self.state = state;
        self.stats.set_state(state);
    }

    // ── Views ─────────────────────────────────────────────────────────────────

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Shared counters for lock-free snapshots.
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Resolved sink path for downloads, once the file exists.
    pub fn sink(&self) -> Option<&PathBuf> {
        self.resolved.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
