//! Frame model — the decoded protocol unit and its builders.
//!
//! A [`Frame`] is what the codec hands the engine and what the engine hands
//! back for encoding. Frame kinds use the standard wire numbering; the type
//! byte on the wire IS the enum discriminant, for hex and binary forms alike.

use serde::{Deserialize, Serialize};

use crate::consts::{CANBRK, CANFC32, CANFDX, CANOVIO};

// ── Direction ─────────────────────────────────────────────────────────────────

/// Which way file bytes flow, from the local side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local file sent to the remote peer.
    Upload,
    /// Remote file written to local disk.
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

// ── Frame kind ────────────────────────────────────────────────────────────────

/// Frame type, numbered exactly as the wire type byte.
///
/// The engine acts on a handful of these; the rest decode cleanly and are
/// ignored by the state machine (peers send what they send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Sender requests receiver init.
    ZRQINIT = 0,
    /// Receiver announces itself and its capabilities.
    ZRINIT = 1,
    /// Sender init (options string follows).
    ZSINIT = 2,
    /// Acknowledgement carrying a byte offset.
    ZACK = 3,
    /// File header: name and size ride in the payload.
    ZFILE = 4,
    /// Receiver skips the offered file.
    ZSKIP = 5,
    /// Negative acknowledgement.
    ZNAK = 6,
    /// Peer aborts the transfer.
    ZABORT = 7,
    /// End of session.
    ZFIN = 8,
    /// Receiver requests data from a byte offset.
    ZRPOS = 9,
    /// File data subpacket; offset rides in flags.
    ZDATA = 10,
    /// End of one file; offset in flags is the final size.
    ZEOF = 11,
    /// Fatal read error on the sender side.
    ZFERR = 12,
    /// File CRC request/response.
    ZCRC = 13,
    ZCHALLENGE = 14,
    ZCOMPL = 15,
    ZCAN = 16,
    ZFREECNT = 17,
    ZCOMMAND = 18,
    ZSTDERR = 19,
}

impl TryFrom<u8> for FrameKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use FrameKind::*;
        Ok(match value {
            0 => ZRQINIT,
            1 => ZRINIT,
            2 => ZSINIT,
            3 => ZACK,
            4 => ZFILE,
            5 => ZSKIP,
            6 => ZNAK,
            7 => ZABORT,
            8 => ZFIN,
            9 => ZRPOS,
            10 => ZDATA,
            11 => ZEOF,
            12 => ZFERR,
            13 => ZCRC,
            14 => ZCHALLENGE,
            15 => ZCOMPL,
            16 => ZCAN,
            17 => ZFREECNT,
            18 => ZCOMMAND,
            19 => ZSTDERR,
            other => return Err(FrameError::UnknownKind(other)),
        })
    }
}

impl FrameKind {
    /// Kinds whose wire form carries a data subpacket after the header.
    pub fn has_payload(self) -> bool {
        matches!(self, FrameKind::ZFILE | FrameKind::ZDATA)
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Which on-wire form produced (or will produce) a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// ASCII-hex header, optional CRC16, optional trailing CR/LF.
    Hex,
    /// Binary with 16-bit CRC.
    Binary16,
    /// Binary with 32-bit CRC.
    Binary32,
}

impl Encoding {
    /// CRC width in bytes for the binary forms.
    pub fn crc_len(self) -> usize {
        match self {
            Encoding::Binary32 => 4,
            _ => 2,
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Type-dependent 32-bit value: capability bits for handshake kinds,
    /// byte offset for position-bearing kinds. Big-endian on the wire.
    pub flags: u32,
    /// Four bytes carried alongside flags. Usually zero.
    pub aux: [u8; 4],
    /// Subpacket data, already unescaped. Empty for header-only kinds.
    pub payload: Vec<u8>,
    pub encoding: Encoding,
    /// Checksum as read from the wire; zero until a frame is encoded.
    pub checksum: u32,
}

impl Frame {
    /// Header-only frame with the given kind and flags.
    pub fn header(kind: FrameKind, flags: u32) -> Self {
        Self {
            kind,
            flags,
            aux: [0; 4],
            payload: Vec::new(),
            encoding: Encoding::Binary32,
            checksum: 0,
        }
    }

    /// Receiver greeting, advertising full-duplex, overlapped I/O, break,
    /// and 32-bit CRC support.
    pub fn zrinit() -> Self {
        Self::header(FrameKind::ZRINIT, CANFDX | CANOVIO | CANBRK | CANFC32)
    }

    /// Acknowledgement carrying `position`.
    pub fn zack(position: u32) -> Self {
        Self::header(FrameKind::ZACK, position)
    }

    /// Request data starting at `position`.
    pub fn zrpos(position: u32) -> Self {
        Self::header(FrameKind::ZRPOS, position)
    }

    /// End of file after `position` bytes.
    pub fn zeof(position: u32) -> Self {
        Self::header(FrameKind::ZEOF, position)
    }

    /// End of session.
    pub fn zfin() -> Self {
        Self::header(FrameKind::ZFIN, 0)
    }

    /// File header announcing `name` and `size`.
    pub fn file_header(name: &str, size: u64) -> Self {
        Self {
            payload: FileHeader::encode(name, size),
            ..Self::header(FrameKind::ZFILE, 0)
        }
    }

    /// Data subpacket starting at byte offset `position`.
    pub fn data(payload: Vec<u8>, position: u32) -> Self {
        Self {
            payload,
            ..Self::header(FrameKind::ZDATA, position)
        }
    }

    /// Byte offset for position-bearing kinds.
    pub fn position(&self) -> u32 {
        self.flags
    }
}

// ── File header payload ───────────────────────────────────────────────────────

/// Name and size parsed from a ZFILE payload.
///
/// Wire form: `name NUL size SP mtime SP mode SP serial NUL`, all fields
/// after the name as ASCII decimals. Only the size is read; peers that omit
/// the size fields entirely are accepted with `size = 0` (unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub size: u64,
}

impl FileHeader {
    /// Parse a ZFILE payload. `None` means the payload cannot name a file
    /// and the frame should be treated as malformed.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.is_empty() {
            return None;
        }

        let (name_bytes, rest) = match payload.iter().position(|&b| b == 0) {
            Some(idx) => (&payload[..idx], &payload[idx + 1..]),
            // Some peers send a bare name with no terminator or size fields.
            None => (payload, &[][..]),
        };
        if name_bytes.is_empty() {
            return None;
        }
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        let digits: Vec<u8> = rest
            .iter()
            .copied()
            .take_while(|b| b.is_ascii_digit())
            .collect();
        let size = std::str::from_utf8(&digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Some(Self { name, size })
    }

    /// Build a ZFILE payload: accurate size, zero placeholders for the
    /// mtime/mode/serial fields.
    pub fn encode(name: &str, size: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(name.len() + 16);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(size.to_string().as_bytes());
        out.extend_from_slice(b" 0 0 0");
        out.push(0);
        out
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors interpreting frame-level values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown frame type byte: 0x{0:02x}")]
    UnknownKind(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
