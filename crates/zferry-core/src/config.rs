//! Configuration system for zferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ZFERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/zferry/config.toml
//!   3. ~/.config/zferry/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::consts;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: LimitsConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted unescaped subpacket payload, in bytes.
    pub max_payload: usize,
    /// Decoder buffer tail kept while no frame-start marker is in sight.
    pub scan_keep: usize,
    /// Sliding window the sniffer searches for handshake markers.
    pub window_keep: usize,
    /// Largest byte carry held between handshake detection and the host's
    /// accept/decline decision.
    pub pending_carry_max: usize,
    /// Frames dispatched per feed call before yielding back to the host.
    pub max_frames_per_feed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Recompute and check binary frame CRCs. Disable for peers speaking
    /// a foreign checksum dialect.
    pub validate_checksums: bool,
    /// Payload bytes per outbound data frame.
    pub chunk_size: usize,
    /// Progress reporter tick, in milliseconds.
    pub progress_interval_ms: u64,
    /// Where downloads land when the host gives no per-session directory.
    pub download_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload: consts::MAX_PAYLOAD,
            scan_keep: consts::SCAN_KEEP,
            window_keep: consts::WINDOW_KEEP,
            pending_carry_max: consts::PENDING_CARRY_MAX,
            max_frames_per_feed: consts::MAX_FRAMES_PER_FEED,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            validate_checksums: true,
            chunk_size: consts::DATA_CHUNK,
            progress_interval_ms: 500,
            download_dir: data_dir().join("downloads"),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("zferry")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("zferry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            EngineConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ZFERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&EngineConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply ZFERRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ZFERRY_LIMITS__MAX_PAYLOAD") {
            if let Ok(n) = v.parse() {
                self.limits.max_payload = n;
            }
        }
        if let Ok(v) = std::env::var("ZFERRY_LIMITS__MAX_FRAMES_PER_FEED") {
            if let Ok(n) = v.parse() {
                self.limits.max_frames_per_feed = n;
            }
        }
        if let Ok(v) = std::env::var("ZFERRY_TRANSFER__VALIDATE_CHECKSUMS") {
            self.transfer.validate_checksums = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("ZFERRY_TRANSFER__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.transfer.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("ZFERRY_TRANSFER__DOWNLOAD_DIR") {
            self.transfer.download_dir = PathBuf::from(v);
        }
    }
}
