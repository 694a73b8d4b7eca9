//! Protocol constants — the ZMODEM dialect spoken by field peers.
//!
//! Every value here is on-wire protocol. The format-byte assignment and the
//! "B10" handshake variant are what deployed peers actually send, not what
//! the published protocol text says; change nothing without a captured trace
//! showing the peer agrees.

use crate::frame::Direction;

// ── Control bytes ─────────────────────────────────────────────────────────────

/// Frame padding character ('*'). Every frame opens with two of these.
pub const ZPAD: u8 = 0x2A;

/// Data link escape (CAN). Introduces the format byte, escape pairs,
/// and subpacket enders.
pub const ZDLE: u8 = 0x18;

/// XOR mask applied to a reserved byte when it travels behind a [`ZDLE`].
pub const ZDLE_XOR: u8 = 0x40;

/// Legacy encoding of an escaped ZDLE seen from older peers. The XOR rule
/// produces 0x58; some senders emit 0x5E instead. Accepted on decode only.
pub const ZDLEE_LEGACY: u8 = 0x5E;

// ── Format bytes ──────────────────────────────────────────────────────────────

/// ASCII-hex header frame.
pub const ZHEX: u8 = 0x30;

/// Binary frame with 16-bit CRC.
pub const ZBIN: u8 = 0x31;

/// Binary frame with 32-bit CRC.
pub const ZBIN32: u8 = 0x32;

// ── Subpacket enders ──────────────────────────────────────────────────────────

/// CRC next, frame ends, header follows.
pub const ZCRCE: u8 = 0x68;

/// CRC next, more subpackets follow nonstop.
pub const ZCRCG: u8 = 0x69;

/// CRC next, more subpackets follow, ACK expected.
pub const ZCRCQ: u8 = 0x6A;

/// CRC next, ACK expected, frame ends.
pub const ZCRCW: u8 = 0x6B;

// ── Receiver capability flags (ZRINIT) ────────────────────────────────────────

/// Full-duplex capable.
pub const CANFDX: u32 = 0x80;

/// Can overlap disk and serial I/O.
pub const CANOVIO: u32 = 0x40;

/// Can send a break signal.
pub const CANBRK: u32 = 0x20;

/// Accepts 32-bit CRC binary frames.
pub const CANFC32: u32 = 0x10;

// ── Default bounds ────────────────────────────────────────────────────────────

/// Largest accepted subpacket payload. Anything longer is malformed.
pub const MAX_PAYLOAD: usize = 8192;

/// Tail kept when a scan buffer grows without finding a frame start.
/// Lossy recovery for streams that are mostly terminal output.
pub const SCAN_KEEP: usize = 512;

/// Sliding window the sniffer searches for handshake markers.
pub const WINDOW_KEEP: usize = 256;

/// Most bytes the sniffer carries between marker detection and the host's
/// begin/decline decision.
pub const PENDING_CARRY_MAX: usize = 8192;

/// Frames dispatched per `feed` call before yielding back to the caller.
pub const MAX_FRAMES_PER_FEED: u32 = 100;

/// File bytes wrapped into one outbound data frame.
pub const DATA_CHUNK: usize = 1024;

// ── Escaping ──────────────────────────────────────────────────────────────────

/// Whether `b` must travel as a `ZDLE, b ^ 0x40` pair.
///
/// The set is ZDLE itself, '@' (telnet escape), the 0x10..=0x1A control
/// range (XON/XOFF and friends), DEL, and the high-parity CR/LF forms
/// 0x8D/0x8A.
pub const fn needs_escape(b: u8) -> bool {
    matches!(b, ZDLE | b'@' | 0x10..=0x1A | 0x7F | 0x8D | 0x8A)
}

// ── Handshake markers ─────────────────────────────────────────────────────────

/// Handshake marker variants observed in live streams, with the transfer
/// direction each announces. Scanned in order; first match wins.
///
/// The `B10` ordering in the fourth entry is not a typo: that byte order is
/// what the matching peers emit for an upload.
pub const HANDSHAKE_PATTERNS: &[(&[u8], Direction)] = &[
    (&[ZPAD, ZPAD, b'B', b'0', b'0'], Direction::Download),
    (&[ZPAD, ZPAD, b'B', b'0', b'1'], Direction::Upload),
    (&[ZPAD, ZPAD, ZDLE, b'B', b'0', b'0'], Direction::Download),
    (&[ZPAD, ZPAD, ZDLE, b'B', b'1', b'0'], Direction::Upload),
    (&[ZPAD, ZDLE, b'B', b'0', b'0'], Direction::Download),
    (&[ZPAD, ZDLE, b'B', b'0', b'1'], Direction::Upload),
];
