//! Frame codec — wire bytes to frames and back, fragmentation-tolerant.
//!
//! [`decode_frame`] is pure: it either yields a complete frame plus the byte
//! count to drop from the buffer front, or reports the buffer still short and
//! consumes nothing. [`FrameDecoder`] owns the cross-call accumulator, the
//! continuation state for chained subpackets, and the resync policy that
//! recovers from malformed input.
//!
//! The frame-start marker is searched anywhere in the buffer; bytes ahead of
//! it are stray terminal output and count into `consumed` once a frame
//! completes. A buffer that grows without ever producing a marker is cut to a
//! bounded tail, a deliberate lossy recovery for streams that are mostly
//! terminal noise.

use crate::consts::{
    needs_escape, MAX_PAYLOAD, SCAN_KEEP, ZBIN, ZBIN32, ZCRCE, ZCRCG, ZCRCQ, ZCRCW, ZDLEE_LEGACY,
    ZDLE, ZDLE_XOR, ZHEX, ZPAD,
};
use crate::crc::{crc16, crc32};
use crate::frame::{Encoding, Frame, FrameError, FrameKind};

// ── Options ───────────────────────────────────────────────────────────────────

/// Decode knobs. Defaults match the protocol constants; hosts override them
/// through the engine configuration.
#[derive(Debug, Clone)]
pub struct DecodeOpts {
    /// Recompute and compare binary frame CRCs. Hex-header CRC digits are
    /// stored but never checked; hex dialects disagree on the final
    /// zero-feed convention and the stakes are a failed handshake, not
    /// corrupt data.
    pub validate_crc: bool,
    /// Largest accepted unescaped subpacket payload.
    pub max_payload: usize,
    /// Tail kept when the accumulator holds no frame-start marker.
    pub scan_keep: usize,
}

impl Default for DecodeOpts {
    fn default() -> Self {
        Self {
            validate_crc: true,
            max_payload: MAX_PAYLOAD,
            scan_keep: SCAN_KEEP,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A definitively malformed frame. Never fatal to a session: the caller
/// resyncs to the next plausible frame start and keeps scanning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("hex header run of {digits} digits is unusable")]
    BadHex { digits: usize },

    #[error("crc mismatch: wire 0x{wire:08x}, computed 0x{computed:08x}")]
    CrcMismatch { wire: u32, computed: u32 },

    #[error("subpacket of {len} bytes exceeds the {max} byte bound")]
    PayloadOversized { len: usize, max: usize },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// A frame plus bookkeeping the stateful decoder needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub frame: Frame,
    /// Total bytes to drop from the buffer front, leading junk included.
    pub consumed: usize,
    /// The subpacket ended with a "more data follows" marker; the next bytes
    /// are a bare subpacket continuing the same data stream.
    pub more_follows: bool,
}

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Frame(DecodedFrame),
    /// No complete frame yet. Nothing was consumed; call again with more.
    Incomplete,
}

/// Decode the first complete frame found in `buf`.
///
/// Scans for the `ZPAD ZPAD` marker anywhere in the buffer, tolerates the
/// format-byte variants peers emit (with or without the ZDLE, the `'B'`
/// sentinel before hex digits, unknown bytes defaulting to ZBIN32), and
/// never consumes on [`DecodeOutcome::Incomplete`].
pub fn decode_frame(buf: &[u8], opts: &DecodeOpts) -> Result<DecodeOutcome, DecodeError> {
    let mut search = 0;
    loop {
        let m = match find_marker(&buf[search..]) {
            Some(p) => search + p,
            None => return Ok(DecodeOutcome::Incomplete),
        };
        let body = m + 2;
        if body >= buf.len() {
            return Ok(DecodeOutcome::Incomplete);
        }

        match buf[body] {
            ZDLE => {
                let Some(&next) = buf.get(body + 1) else {
                    return Ok(DecodeOutcome::Incomplete);
                };
                match next {
                    ZHEX => return parse_hex(buf, body + 2),
                    ZBIN | ZBIN32 => return parse_binary(buf, m, body + 2, next, opts),
                    b'B' => {
                        // Some peers mark hex headers with a 'B' sentinel.
                        // Hex only if hex digits actually follow; either way
                        // the sentinel itself is not data.
                        let Some(&after) = buf.get(body + 2) else {
                            return Ok(DecodeOutcome::Incomplete);
                        };
                        return if after.is_ascii_hexdigit() {
                            parse_hex(buf, body + 2)
                        } else {
                            parse_binary(buf, m, body + 2, ZBIN32, opts)
                        };
                    }
                    // Unknown byte after ZDLE: treat it as the type byte of
                    // a ZBIN32 frame, matching what peers expect.
                    _ => return parse_binary(buf, m, body + 1, ZBIN32, opts),
                }
            }
            // Format byte without the ZDLE. A tolerated variant.
            fmt @ (ZHEX | ZBIN | ZBIN32) => {
                return if fmt == ZHEX {
                    parse_hex(buf, body + 1)
                } else {
                    parse_binary(buf, m, body + 1, fmt, opts)
                };
            }
            // Not a frame start after all. Pad runs overlap, so the real
            // marker may begin one byte in; resume the scan there.
            _ => search = m + 1,
        }
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == [ZPAD, ZPAD])
}

/// ASCII-hex header: a contiguous hex run of at least 10 digits (type and
/// flags), optionally followed by 4 CRC digits and CR/LF. One non-hex lead
/// byte is tolerated; some peers open with a sentinel.
fn parse_hex(buf: &[u8], hdr: usize) -> Result<DecodeOutcome, DecodeError> {
    let mut p = hdr;
    if p >= buf.len() {
        return Ok(DecodeOutcome::Incomplete);
    }
    if !buf[p].is_ascii_hexdigit() {
        p += 1;
        if p >= buf.len() {
            return Ok(DecodeOutcome::Incomplete);
        }
    }

    let run_start = p;
    while p < buf.len() && buf[p].is_ascii_hexdigit() {
        p += 1;
    }
    if p == buf.len() {
        // The run may still be growing; decode only once a terminator
        // (CR/LF or the next frame's pad) pins its length.
        return Ok(DecodeOutcome::Incomplete);
    }

    let digits = p - run_start;
    if digits < 10 || digits % 2 != 0 {
        return Err(DecodeError::BadHex { digits });
    }

    let decoded =
        hex::decode(&buf[run_start..p]).map_err(|_| DecodeError::BadHex { digits })?;
    let kind = FrameKind::try_from(decoded[0])?;
    let flags = u32::from_be_bytes([decoded[1], decoded[2], decoded[3], decoded[4]]);
    let checksum = if decoded.len() >= 7 {
        u16::from_be_bytes([decoded[5], decoded[6]]) as u32
    } else {
        0
    };

    let mut consumed = p;
    while consumed < buf.len() && (buf[consumed] == b'\r' || buf[consumed] == b'\n') {
        consumed += 1;
    }

    Ok(DecodeOutcome::Frame(DecodedFrame {
        frame: Frame {
            kind,
            flags,
            aux: [0; 4],
            payload: Vec::new(),
            encoding: Encoding::Hex,
            checksum,
        },
        consumed,
        more_follows: false,
    }))
}

/// Binary frame body: escaped type, flags, auxiliary bytes, a subpacket for
/// the kinds that carry one, then the escaped CRC. The CRC covers the raw
/// wire bytes after the two pads, escapes included.
fn parse_binary(
    buf: &[u8],
    frame_start: usize,
    hdr: usize,
    fmt: u8,
    opts: &DecodeOpts,
) -> Result<DecodeOutcome, DecodeError> {
    let mut pos = hdr;

    let Some(type_byte) = read_escaped(buf, &mut pos) else {
        return Ok(DecodeOutcome::Incomplete);
    };
    let kind = FrameKind::try_from(type_byte)?;

    let mut flag_bytes = [0u8; 4];
    for slot in &mut flag_bytes {
        let Some(b) = read_escaped(buf, &mut pos) else {
            return Ok(DecodeOutcome::Incomplete);
        };
        *slot = b;
    }
    let mut aux = [0u8; 4];
    for slot in &mut aux {
        let Some(b) = read_escaped(buf, &mut pos) else {
            return Ok(DecodeOutcome::Incomplete);
        };
        *slot = b;
    }

    let (payload, ender) = if kind.has_payload() {
        match scan_subpacket(buf, pos, opts.max_payload)? {
            Some((payload, ender, end)) => {
                pos = end;
                (payload, Some(ender))
            }
            None => return Ok(DecodeOutcome::Incomplete),
        }
    } else {
        (Vec::new(), None)
    };

    let encoding = if fmt == ZBIN {
        Encoding::Binary16
    } else {
        Encoding::Binary32
    };

    let crc_start = pos;
    let Some((wire_crc, end)) = read_escaped_crc(buf, pos, encoding.crc_len()) else {
        return Ok(DecodeOutcome::Incomplete);
    };
    if opts.validate_crc {
        let covered = &buf[frame_start + 2..crc_start];
        let computed = match encoding {
            Encoding::Binary32 => crc32(covered),
            _ => crc16(covered) as u32,
        };
        if computed != wire_crc {
            return Err(DecodeError::CrcMismatch {
                wire: wire_crc,
                computed,
            });
        }
    }

    Ok(DecodeOutcome::Frame(DecodedFrame {
        frame: Frame {
            kind,
            flags: u32::from_be_bytes(flag_bytes),
            aux,
            payload,
            encoding,
            checksum: wire_crc,
        },
        consumed: end,
        more_follows: matches!(ender, Some(ZCRCG) | Some(ZCRCQ)),
    }))
}

/// A bare subpacket continuing a chained data frame: payload to the next
/// ender, then the CRC, no header. Produced as a ZDATA frame with zero flags.
fn parse_bare_subpacket(
    buf: &[u8],
    encoding: Encoding,
    opts: &DecodeOpts,
) -> Result<Option<DecodedFrame>, DecodeError> {
    let Some((payload, ender, after)) = scan_subpacket(buf, 0, opts.max_payload)? else {
        return Ok(None);
    };
    let Some((wire_crc, end)) = read_escaped_crc(buf, after, encoding.crc_len()) else {
        return Ok(None);
    };
    if opts.validate_crc {
        let computed = match encoding {
            Encoding::Binary32 => crc32(&buf[..after]),
            _ => crc16(&buf[..after]) as u32,
        };
        if computed != wire_crc {
            return Err(DecodeError::CrcMismatch {
                wire: wire_crc,
                computed,
            });
        }
    }

    Ok(Some(DecodedFrame {
        frame: Frame {
            kind: FrameKind::ZDATA,
            flags: 0,
            aux: [0; 4],
            payload,
            encoding,
            checksum: wire_crc,
        },
        consumed: end,
        more_follows: matches!(ender, ZCRCG | ZCRCQ),
    }))
}

/// Unescape one byte at `pos`. `None` means the buffer ran out mid-field.
fn read_escaped(buf: &[u8], pos: &mut usize) -> Option<u8> {
    let &b = buf.get(*pos)?;
    if b == ZDLE {
        let &escaped = buf.get(*pos + 1)?;
        *pos += 2;
        Some(if escaped == ZDLEE_LEGACY {
            ZDLE
        } else {
            escaped ^ ZDLE_XOR
        })
    } else {
        *pos += 1;
        Some(b)
    }
}

/// Read `width` escaped CRC bytes as one big-endian value.
fn read_escaped_crc(buf: &[u8], mut pos: usize, width: usize) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    for _ in 0..width {
        let b = read_escaped(buf, &mut pos)?;
        value = (value << 8) | b as u32;
    }
    Some((value, pos))
}

/// Collect an escaped payload up to a `ZDLE` + ender pair.
/// `Ok(None)` means the ender has not arrived yet.
fn scan_subpacket(
    buf: &[u8],
    mut pos: usize,
    max_payload: usize,
) -> Result<Option<(Vec<u8>, u8, usize)>, DecodeError> {
    let mut payload = Vec::new();
    loop {
        let Some(&b) = buf.get(pos) else {
            return Ok(None);
        };
        if b == ZDLE {
            let Some(&next) = buf.get(pos + 1) else {
                return Ok(None);
            };
            if matches!(next, ZCRCE | ZCRCG | ZCRCQ | ZCRCW) {
                return Ok(Some((payload, next, pos + 2)));
            }
            payload.push(if next == ZDLEE_LEGACY {
                ZDLE
            } else {
                next ^ ZDLE_XOR
            });
            pos += 2;
        } else {
            payload.push(b);
            pos += 1;
        }
        if payload.len() > max_payload {
            return Err(DecodeError::PayloadOversized {
                len: payload.len(),
                max: max_payload,
            });
        }
    }
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encode a frame in binary form.
///
/// `Binary16` frames get a 16-bit CRC; everything else, hex-decoded frames
/// included, goes out as ZBIN32 (this engine never emits hex). Type, flags,
/// auxiliary, payload, and CRC bytes are all escaped; the payload, present
/// only for the kinds that carry one, is closed with a `ZCRCE` ender. The
/// CRC covers the escaped wire bytes after the two pads.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let fmt = match frame.encoding {
        Encoding::Binary16 => ZBIN,
        _ => ZBIN32,
    };

    let mut out = Vec::with_capacity(frame.payload.len() * 2 + 24);
    out.push(ZPAD);
    out.push(ZPAD);
    out.push(ZDLE);
    out.push(fmt);
    push_escaped(&mut out, frame.kind as u8);
    for b in frame.flags.to_be_bytes() {
        push_escaped(&mut out, b);
    }
    for b in frame.aux {
        push_escaped(&mut out, b);
    }
    if frame.kind.has_payload() {
        for &b in &frame.payload {
            push_escaped(&mut out, b);
        }
        out.push(ZDLE);
        out.push(ZCRCE);
    }

    match fmt {
        ZBIN => {
            for b in crc16(&out[2..]).to_be_bytes() {
                push_escaped(&mut out, b);
            }
        }
        _ => {
            for b in crc32(&out[2..]).to_be_bytes() {
                push_escaped(&mut out, b);
            }
        }
    }
    out
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    if needs_escape(b) {
        out.push(ZDLE);
        out.push(b ^ ZDLE_XOR);
    } else {
        out.push(b);
    }
}

// ── Stateful decoder ──────────────────────────────────────────────────────────

/// Accumulating decoder: feed arbitrary fragments, pull whole frames.
///
/// Owns the buffer across calls, chains continuation subpackets, and on a
/// malformed frame skips to the next plausible frame start so one corrupt
/// stretch never wedges the stream.
pub struct FrameDecoder {
    buf: Vec<u8>,
    opts: DecodeOpts,
    /// Encoding of a chained data frame whose next subpacket arrives bare.
    continuation: Option<Encoding>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_opts(DecodeOpts::default())
    }

    pub fn with_opts(opts: DecodeOpts) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            opts,
            continuation: None,
        }
    }

    /// Append raw transport bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything, continuation state included.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.continuation = None;
    }

    /// Decode the next frame, if a complete one is buffered.
    ///
    /// On a malformed frame this resyncs internally and returns the error;
    /// the following call scans from the next plausible frame start.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if let Some(encoding) = self.continuation {
            return match parse_bare_subpacket(&self.buf, encoding, &self.opts) {
                Ok(Some(decoded)) => {
                    self.buf.drain(..decoded.consumed);
                    if !decoded.more_follows {
                        self.continuation = None;
                    }
                    Ok(Some(decoded.frame))
                }
                Ok(None) => Ok(None),
                Err(e) => {
                    self.continuation = None;
                    self.resync();
                    Err(e)
                }
            };
        }

        match decode_frame(&self.buf, &self.opts) {
            Ok(DecodeOutcome::Frame(decoded)) => {
                self.buf.drain(..decoded.consumed);
                if decoded.more_follows && decoded.frame.kind.has_payload() {
                    self.continuation = Some(decoded.frame.encoding);
                }
                Ok(Some(decoded.frame))
            }
            Ok(DecodeOutcome::Incomplete) => {
                // Bound a marker-less accumulator. A partial frame always
                // contains its marker and is never cut here.
                if self.buf.len() > self.opts.scan_keep && find_marker(&self.buf).is_none() {
                    let cut = self.buf.len() - self.opts.scan_keep;
                    self.buf.drain(..cut);
                }
                Ok(None)
            }
            Err(e) => {
                self.resync();
                Err(e)
            }
        }
    }

    /// Skip to the next plausible frame start.
    ///
    /// Drops the marker that opened the malformed frame, then cuts to the
    /// next pad byte (or empties the buffer if there is none). Always
    /// consumes at least one byte, so repeated calls terminate.
    pub fn resync(&mut self) {
        match find_marker(&self.buf) {
            Some(m) => {
                self.buf.drain(..m + 2);
            }
            None => {
                if !self.buf.is_empty() {
                    self.buf.remove(0);
                }
            }
        }
        match self.buf.iter().position(|&b| b == ZPAD) {
            Some(p) => {
                self.buf.drain(..p);
            }
            None => self.buf.clear(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
